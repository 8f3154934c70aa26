use anyhow::{Context, Result};
use time::Duration;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::{CopyStatus, GradingAction};
use crate::repositories;
use crate::services::storage;

/// Sweeps copies stuck in transient states. STAGING copies past the
/// threshold are deleted when they never got booklets, promoted to READY
/// when their pages rendered, and left alone while rasterization is still
/// pending. LOCKED copies whose lock expired are force-released.
/// With `dry_run` the sweep only reports what it would touch.
pub(crate) async fn reap_stuck_copies(state: &AppState, dry_run: bool) -> Result<()> {
    let now = primitive_now_utc();
    let maintenance = state.settings().maintenance();

    let staging_cutoff = now - Duration::minutes(maintenance.staging_threshold_minutes as i64);
    let stale = repositories::copies::list_stale_staging(state.db(), staging_cutoff)
        .await
        .context("Failed to list stale staging copies")?;

    let mut deleted = 0u64;
    let mut promoted = 0u64;
    for (copy_id, booklet_count) in stale {
        if booklet_count == 0 {
            tracing::info!(copy_id, dry_run, "Reaping bookletless staging copy");
            if !dry_run {
                delete_orphan_copy(state, &copy_id).await?;
            }
            deleted += 1;
            continue;
        }

        let rendered_pages = repositories::copies::booklet_page_count(state.db(), &copy_id)
            .await
            .context("Failed to count rendered pages")?;
        if rendered_pages == 0 {
            // Rasterization never finished; an operator decides its fate.
            tracing::warn!(copy_id, "Stale staging copy still has no page images");
            continue;
        }

        tracing::info!(copy_id, dry_run, "Promoting stale rendered copy to ready");
        if !dry_run {
            promote_to_ready(state, &copy_id).await?;
        }
        promoted += 1;
    }

    let locked_cutoff = now - Duration::minutes(maintenance.locked_threshold_minutes as i64);
    let expired = repositories::copies::list_expired_locked(state.db(), locked_cutoff)
        .await
        .context("Failed to list expired locked copies")?;

    let mut recovered = 0u64;
    for copy_id in expired {
        tracing::info!(copy_id, dry_run, "Recovering copy with expired lock");
        if !dry_run {
            recover_expired_lock(state, &copy_id).await?;
        }
        recovered += 1;
    }

    if deleted + promoted + recovered > 0 {
        tracing::info!(deleted, promoted, recovered, dry_run, "Stuck-copy sweep finished");
    }
    metrics::counter!("maintenance_copies_deleted_total").increment(deleted);
    metrics::counter!("maintenance_copies_promoted_total").increment(promoted);
    metrics::counter!("maintenance_locks_recovered_total").increment(recovered);

    Ok(())
}

pub(crate) async fn reap_expired_drafts(state: &AppState) -> Result<()> {
    let ttl = Duration::hours(state.settings().maintenance().draft_ttl_hours as i64);
    let cutoff = primitive_now_utc() - ttl;

    let deleted = repositories::drafts::delete_older_than(state.db(), cutoff)
        .await
        .context("Failed to delete expired drafts")?;

    if deleted > 0 {
        tracing::info!(deleted, "Expired drafts removed");
    }
    metrics::counter!("maintenance_drafts_deleted_total").increment(deleted);

    Ok(())
}

async fn delete_orphan_copy(state: &AppState, copy_id: &str) -> Result<()> {
    if let Some(storage_service) = state.storage() {
        let key = storage::source_pdf_key(copy_id);
        if let Err(err) = storage_service.delete_object(&key).await {
            tracing::warn!(copy_id, error = %err, "Failed to delete orphan source PDF");
        }
    }
    repositories::copies::delete(state.db(), copy_id)
        .await
        .context("Failed to delete orphan copy")?;
    Ok(())
}

async fn promote_to_ready(state: &AppState, copy_id: &str) -> Result<()> {
    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;
    repositories::copies::set_status(&mut tx, copy_id, CopyStatus::Ready, now).await?;
    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id,
            actor_id: None,
            action: GradingAction::Validate,
            metadata: serde_json::json!({ "source": "maintenance" }),
            created_at: now,
        },
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

/// The sweep is idempotent: a copy already released by a concurrent
/// heartbeat or release simply no longer matches the expired listing.
async fn recover_expired_lock(state: &AppState, copy_id: &str) -> Result<()> {
    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;

    let Some(copy) = repositories::copies::find_by_id_for_update(&mut tx, copy_id).await? else {
        return Ok(());
    };
    if copy.status != CopyStatus::Locked {
        return Ok(());
    }
    let Some(lock) = repositories::locks::find_by_copy_for_update(&mut tx, copy_id).await? else {
        return Ok(());
    };
    if lock.expires_at > now {
        return Ok(());
    }

    repositories::locks::delete(&mut tx, copy_id).await?;
    repositories::copies::set_status(&mut tx, copy_id, CopyStatus::Ready, now).await?;
    repositories::copies::set_locked_snapshot(&mut tx, copy_id, None, None, now).await?;
    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id,
            actor_id: None,
            action: GradingAction::UnlockRecovery,
            metadata: serde_json::json!({ "previous_owner": lock.owner_id }),
            created_at: now,
        },
    )
    .await?;
    tx.commit().await?;
    Ok(())
}
