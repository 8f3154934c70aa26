use thiserror::Error;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::Copy;
use crate::db::types::{CopyStatus, GradingAction};
use crate::repositories;
use crate::services::flatten;
use crate::services::locks::LockError;
use crate::services::scoring;
use crate::services::storage;

#[derive(Debug, Error)]
pub(crate) enum LifecycleError {
    #[error("Copy not found")]
    NotFound,
    #[error("{0}")]
    BadTransition(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("{0}")]
    Processing(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// The only legal status transitions. Everything else is a `BadTransition`.
pub(crate) fn transition_allowed(from: CopyStatus, to: CopyStatus) -> bool {
    use CopyStatus::*;
    matches!(
        (from, to),
        (Staging, Ready)
            | (Staging, Quarantine)
            | (Quarantine, Ready)
            | (Quarantine, Staging)
            | (Ready, Locked)
            | (Locked, Ready)
            | (Locked, Graded)
    )
}

/// STAGING → READY. Guard: at least one booklet, each with at least one
/// rasterized page.
pub(crate) async fn validate_copy(
    state: &AppState,
    copy_id: &str,
    actor_id: &str,
) -> Result<Copy, LifecycleError> {
    transition_with_booklet_guard(state, copy_id, actor_id, CopyStatus::Staging, GradingAction::Validate)
        .await
}

/// QUARANTINE → READY, same guard as validation.
pub(crate) async fn release_from_quarantine(
    state: &AppState,
    copy_id: &str,
    actor_id: &str,
) -> Result<Copy, LifecycleError> {
    transition_with_booklet_guard(
        state,
        copy_id,
        actor_id,
        CopyStatus::Quarantine,
        GradingAction::Release,
    )
    .await
}

async fn transition_with_booklet_guard(
    state: &AppState,
    copy_id: &str,
    actor_id: &str,
    expected_from: CopyStatus,
    action: GradingAction,
) -> Result<Copy, LifecycleError> {
    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;

    let copy = repositories::copies::find_by_id_for_update(&mut tx, copy_id)
        .await?
        .ok_or(LifecycleError::NotFound)?;
    if copy.status != expected_from {
        return Err(LifecycleError::BadTransition(format!(
            "Copy in status {:?} cannot move to READY via this operation",
            copy.status
        )));
    }

    let booklets = repositories::booklets::list_for_copy(state.db(), copy_id).await?;
    if booklets.is_empty() {
        return Err(LifecycleError::Validation("Copy has no booklets".to_string()));
    }
    if booklets.iter().any(|booklet| booklet.pages_images.0.is_empty()) {
        return Err(LifecycleError::Validation(
            "Every booklet must have at least one rasterized page".to_string(),
        ));
    }

    repositories::copies::set_status(&mut tx, copy_id, CopyStatus::Ready, now).await?;
    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id,
            actor_id: Some(actor_id),
            action,
            metadata: serde_json::json!({ "from": copy.status, "to": CopyStatus::Ready }),
            created_at: now,
        },
    )
    .await?;
    tx.commit().await?;

    repositories::copies::find_by_id(state.db(), copy_id)
        .await?
        .ok_or(LifecycleError::NotFound)
}

/// STAGING → QUARANTINE.
pub(crate) async fn quarantine_copy(
    state: &AppState,
    copy_id: &str,
    actor_id: &str,
    reason: Option<&str>,
) -> Result<Copy, LifecycleError> {
    simple_transition(
        state,
        copy_id,
        actor_id,
        CopyStatus::Staging,
        CopyStatus::Quarantine,
        GradingAction::Quarantine,
        serde_json::json!({ "reason": reason }),
    )
    .await
}

/// QUARANTINE → STAGING.
pub(crate) async fn reset_to_staging(
    state: &AppState,
    copy_id: &str,
    actor_id: &str,
) -> Result<Copy, LifecycleError> {
    simple_transition(
        state,
        copy_id,
        actor_id,
        CopyStatus::Quarantine,
        CopyStatus::Staging,
        GradingAction::Reset,
        serde_json::json!({}),
    )
    .await
}

async fn simple_transition(
    state: &AppState,
    copy_id: &str,
    actor_id: &str,
    expected_from: CopyStatus,
    to: CopyStatus,
    action: GradingAction,
    metadata: serde_json::Value,
) -> Result<Copy, LifecycleError> {
    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;

    let copy = repositories::copies::find_by_id_for_update(&mut tx, copy_id)
        .await?
        .ok_or(LifecycleError::NotFound)?;
    if copy.status != expected_from || !transition_allowed(copy.status, to) {
        return Err(LifecycleError::BadTransition(format!(
            "Transition {:?} -> {:?} is not allowed",
            copy.status, to
        )));
    }

    repositories::copies::set_status(&mut tx, copy_id, to, now).await?;
    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id,
            actor_id: Some(actor_id),
            action,
            metadata,
            created_at: now,
        },
    )
    .await?;
    tx.commit().await?;

    repositories::copies::find_by_id(state.db(), copy_id)
        .await?
        .ok_or(LifecycleError::NotFound)
}

pub(crate) struct FinalizeOutcome {
    pub(crate) final_pdf: String,
    pub(crate) score: f64,
    pub(crate) graded_at: time::PrimitiveDateTime,
}

/// LOCKED → GRADED. The copy row is locked FOR UPDATE before the pages are
/// flattened and stays locked until commit, so concurrent finalizes serialize
/// here: the loser blocks, then observes GRADED and fails without ever
/// flattening.
pub(crate) async fn finalize_copy(
    state: &AppState,
    copy_id: &str,
    actor_id: &str,
    token: &str,
    global_appreciation: Option<&str>,
) -> Result<FinalizeOutcome, LifecycleError> {
    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;

    let copy = repositories::copies::find_by_id_for_update(&mut tx, copy_id)
        .await?
        .ok_or(LifecycleError::NotFound)?;
    if copy.status != CopyStatus::Locked {
        return Err(LifecycleError::BadTransition(
            "Only LOCKED copies can be finalized".to_string(),
        ));
    }
    let lock = repositories::locks::find_by_copy_for_update(&mut tx, copy_id)
        .await?
        .ok_or_else(|| LockError::Conflict("No active lock on this copy".to_string()))?;
    if lock.token != token || lock.owner_id != actor_id || lock.expires_at <= now {
        return Err(LockError::Conflict("Lock is no longer held by the caller".to_string()).into());
    }

    // Flattening reads booklets and annotations through the pool; only the
    // copy and lock rows are pinned by this transaction.
    let staged_key = match stage_flattened_pdf(state, copy_id).await {
        Ok(key) => key,
        Err(err) => {
            drop(tx);
            record_failure(state, copy_id, actor_id, GradingAction::FinalizeFailed, &err).await;
            return Err(LifecycleError::Processing(err));
        }
    };

    let score = scoring::compute_score(state.db(), copy_id).await?;
    let final_key = storage::final_pdf_key(copy_id);

    if let Some(storage_service) = state.storage() {
        storage_service
            .copy_object(&staged_key, &final_key)
            .await
            .map_err(|err| LifecycleError::Processing(format!("blob promotion failed: {err}")))?;
    }

    if let Some(appreciation) = global_appreciation {
        repositories::copies::set_global_appreciation(&mut tx, copy_id, appreciation, now).await?;
    }
    repositories::locks::delete(&mut tx, copy_id).await?;
    repositories::copies::mark_graded(&mut tx, copy_id, &final_key, now).await?;
    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id,
            actor_id: Some(actor_id),
            action: GradingAction::Finalize,
            metadata: serde_json::json!({ "score": score, "final_pdf": final_key }),
            created_at: now,
        },
    )
    .await?;
    tx.commit().await?;

    if let Some(storage_service) = state.storage() {
        if let Err(err) = storage_service.delete_object(&staged_key).await {
            tracing::warn!(error = %err, copy_id, "failed to remove staged finalize blob");
        }
    }

    Ok(FinalizeOutcome { final_pdf: final_key, score, graded_at: now })
}

/// Flatten the copy's pages off the request path and upload the result to
/// the staging key.
async fn stage_flattened_pdf(state: &AppState, copy_id: &str) -> Result<String, String> {
    let booklets = repositories::booklets::list_for_copy(state.db(), copy_id)
        .await
        .map_err(|err| format!("failed to load booklets: {err}"))?;
    let page_keys: Vec<String> =
        booklets.iter().flat_map(|booklet| booklet.pages_images.0.iter().cloned()).collect();
    if page_keys.is_empty() {
        return Err("copy has no page images".to_string());
    }

    let storage_service =
        state.storage().ok_or_else(|| "blob storage is not configured".to_string())?;

    let mut pages = Vec::with_capacity(page_keys.len());
    for key in &page_keys {
        let bytes = storage_service
            .download_bytes(key)
            .await
            .map_err(|err| format!("failed to read page {key}: {err}"))?;
        pages.push(bytes);
    }

    let annotations = repositories::annotations::list_for_copy(state.db(), copy_id)
        .await
        .map_err(|err| format!("failed to load annotations: {err}"))?;

    let pdf = tokio::task::spawn_blocking(move || flatten::flatten_pages(&pages, &annotations))
        .await
        .map_err(|err| format!("flatten task panicked: {err}"))?
        .map_err(|err| err.to_string())?;

    let staged_key = storage::staged_pdf_key(copy_id);
    storage_service
        .upload_bytes(&staged_key, "application/pdf", pdf)
        .await
        .map_err(|err| format!("failed to stage final PDF: {err}"))?;

    Ok(staged_key)
}

async fn record_failure(
    state: &AppState,
    copy_id: &str,
    actor_id: &str,
    action: GradingAction,
    detail: &str,
) {
    let now = primitive_now_utc();
    let result = async {
        let mut tx = state.db().begin().await?;
        repositories::events::append(
            &mut tx,
            repositories::events::AppendEvent {
                id: &Uuid::new_v4().to_string(),
                copy_id,
                actor_id: Some(actor_id),
                action,
                metadata: serde_json::json!({ "detail": detail }),
                created_at: now,
            },
        )
        .await?;
        tx.commit().await
    }
    .await;

    if let Err(err) = result {
        tracing::error!(error = %err, copy_id, "failed to record failure event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CopyStatus::*;

    #[test]
    fn legal_transitions_match_the_table() {
        let legal = [
            (Staging, Ready),
            (Staging, Quarantine),
            (Quarantine, Ready),
            (Quarantine, Staging),
            (Ready, Locked),
            (Locked, Ready),
            (Locked, Graded),
        ];
        for (from, to) in legal {
            assert!(transition_allowed(from, to), "{from:?} -> {to:?} should be legal");
        }
    }

    #[test]
    fn graded_is_terminal_and_no_shortcuts_exist() {
        let all = [Staging, Ready, Locked, Graded, Quarantine];
        for to in all {
            assert!(!transition_allowed(Graded, to), "GRADED -> {to:?} must be illegal");
        }
        assert!(!transition_allowed(Staging, Locked));
        assert!(!transition_allowed(Staging, Graded));
        assert!(!transition_allowed(Ready, Graded));
        assert!(!transition_allowed(Ready, Staging));
        assert!(!transition_allowed(Ready, Quarantine));
        assert!(!transition_allowed(Locked, Quarantine));
    }
}
