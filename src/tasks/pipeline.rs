use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::BackgroundTask;
use crate::db::types::{GradingAction, TaskKind};
use crate::repositories;
use crate::services::identify::{self, cloud::CloudOcrService};
use crate::services::{raster, storage};

pub(crate) async fn claim_next_task(pool: &PgPool) -> Result<Option<BackgroundTask>> {
    let mut tx = pool.begin().await.context("Failed to open claim transaction")?;
    let task = repositories::tasks::claim_next(&mut tx, primitive_now_utc())
        .await
        .context("Failed to claim background task")?;
    tx.commit().await.context("Failed to commit claim")?;
    Ok(task)
}

/// Runs a claimed task to completion and records the outcome. Failures are
/// written to the task row and the copy's event log, never propagated.
pub(crate) async fn run_task(
    state: &AppState,
    cloud: Option<&CloudOcrService>,
    task: &BackgroundTask,
) {
    let outcome = match task.kind {
        TaskKind::Rasterize => process_rasterize(state, &task.copy_id).await,
        TaskKind::Identify => identify_copy(state, cloud, &task.copy_id).await,
    };

    let now = primitive_now_utc();
    match outcome {
        Ok(()) => {
            if let Err(err) = repositories::tasks::mark_success(state.db(), &task.id, now).await {
                tracing::error!(task_id = %task.id, error = %err, "Failed to mark task success");
            }
        }
        Err(err) => {
            tracing::error!(
                task_id = %task.id,
                copy_id = %task.copy_id,
                kind = ?task.kind,
                error = %err,
                "Background task failed"
            );
            if let Err(mark_err) =
                repositories::tasks::mark_error(state.db(), &task.id, &err.to_string(), now).await
            {
                tracing::error!(task_id = %task.id, error = %mark_err, "Failed to mark task error");
            }
            if let Err(event_err) = record_failure(state, task, &err.to_string()).await {
                tracing::error!(
                    task_id = %task.id,
                    error = %event_err,
                    "Failed to record task failure event"
                );
            }
        }
    }
}

/// Renders the source PDF and distributes page images to the copy's
/// booklets. Already-rendered copies skip straight to identification, so a
/// retried task does not redo the work.
async fn process_rasterize(state: &AppState, copy_id: &str) -> Result<()> {
    let copy = repositories::copies::find_by_id(state.db(), copy_id)
        .await?
        .context("Copy not found")?;
    let booklets = repositories::booklets::list_for_copy(state.db(), copy_id).await?;
    if booklets.is_empty() {
        anyhow::bail!("Copy has no booklets to rasterize");
    }

    let already_rendered = booklets.iter().all(|booklet| !booklet.pages_images.0.is_empty());
    if !already_rendered {
        let storage_service =
            state.storage().ok_or_else(|| anyhow::anyhow!("S3 storage not configured"))?;
        let source_key = copy.pdf_source.as_deref().context("Copy has no source PDF")?;
        let pdf_bytes = storage_service
            .download_bytes(source_key)
            .await
            .context("Failed to fetch source PDF")?;

        let images = raster::rasterize(state.settings(), &pdf_bytes)
            .await
            .context("Rasterization failed")?;

        let mut page_keys = Vec::with_capacity(images.len());
        for (index, png) in images.into_iter().enumerate() {
            let key = storage::page_key(copy_id, index);
            storage_service
                .upload_bytes(&key, "image/png", png)
                .await
                .with_context(|| format!("Failed to upload page image {index}"))?;
            page_keys.push(key);
        }

        for booklet in &booklets {
            let start = (booklet.start_page as usize).saturating_sub(1);
            let end = (booklet.end_page as usize).min(page_keys.len());
            if start >= end {
                anyhow::bail!(
                    "Booklet {} page range {}..{} exceeds the {} rendered pages",
                    booklet.id,
                    booklet.start_page,
                    booklet.end_page,
                    page_keys.len()
                );
            }
            repositories::booklets::set_pages_images(
                state.db(),
                &booklet.id,
                &page_keys[start..end],
            )
            .await?;
        }

        metrics::counter!("copies_rasterized_total").increment(1);
    }

    let mut tx = state.db().begin().await?;
    repositories::tasks::enqueue(
        &mut tx,
        &Uuid::new_v4().to_string(),
        TaskKind::Identify,
        copy_id,
        primitive_now_utc(),
    )
    .await?;
    tx.commit().await?;

    Ok(())
}

async fn identify_copy(
    state: &AppState,
    cloud: Option<&CloudOcrService>,
    copy_id: &str,
) -> Result<()> {
    identify::identify_copy(state, cloud, copy_id)
        .await
        .context("Identification failed")?;
    metrics::counter!("copies_identified_total").increment(1);
    Ok(())
}

async fn record_failure(state: &AppState, task: &BackgroundTask, error: &str) -> Result<()> {
    let action = match task.kind {
        TaskKind::Rasterize => GradingAction::RasterizeFailed,
        TaskKind::Identify => GradingAction::IdentifyFailed,
    };

    let mut tx = state.db().begin().await?;
    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id: &task.copy_id,
            actor_id: None,
            action,
            metadata: serde_json::json!({ "task_id": task.id, "error": error }),
            created_at: primitive_now_utc(),
        },
    )
    .await?;
    tx.commit().await?;
    Ok(())
}
