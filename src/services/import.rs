use thiserror::Error;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::Copy;
use crate::db::types::{GradingAction, TaskKind, UploadMode};
use crate::repositories;
use crate::services::raster::{self, RasterError};
use crate::services::storage;

/// A folded A3 sheet scans to four A4 pages; batch uploads are cut into
/// booklets on that boundary. Individual uploads keep one booklet per copy.
const BATCH_A3_PAGES_PER_BOOKLET: usize = 4;

#[derive(Debug, Error)]
pub(crate) enum ImportError {
    #[error("Exam not found")]
    ExamNotFound,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Storage(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub(crate) struct ImportOutcome {
    pub(crate) copy: Copy,
    pub(crate) booklet_ids: Vec<String>,
    pub(crate) rasterize_task_id: String,
}

/// Upload path: validate the PDF, persist the source blob, create the
/// STAGING copy with its booklets, and queue rasterization.
pub(crate) async fn import_pdf(
    state: &AppState,
    exam_id: &str,
    actor_id: &str,
    pdf_bytes: Vec<u8>,
) -> Result<ImportOutcome, ImportError> {
    let exam = repositories::exams::find_by_id(state.db(), exam_id)
        .await?
        .ok_or(ImportError::ExamNotFound)?;

    let max_bytes = state.settings().raster().max_upload_size_mb as usize * 1024 * 1024;
    if pdf_bytes.len() > max_bytes {
        return Err(ImportError::Validation(format!(
            "Upload exceeds the {} MB limit",
            state.settings().raster().max_upload_size_mb
        )));
    }

    let pages = match raster::page_count(&pdf_bytes) {
        Ok(pages) => pages,
        Err(RasterError::EmptyPdf) => {
            return Err(ImportError::Validation("PDF has no pages".to_string()))
        }
        Err(err) => return Err(ImportError::Validation(err.to_string())),
    };

    let copy_id = Uuid::new_v4().to_string();
    let now = primitive_now_utc();

    let source_key = storage::source_pdf_key(&copy_id);
    if let Some(storage_service) = state.storage() {
        storage_service
            .upload_bytes(&source_key, "application/pdf", pdf_bytes)
            .await
            .map_err(|err| ImportError::Storage(format!("failed to store upload: {err}")))?;
    }

    let anonymous_id = allocate_anonymous_id(state, exam_id).await?;

    let copy = repositories::copies::create_staging(
        state.db(),
        repositories::copies::CreateCopy {
            id: &copy_id,
            exam_id,
            anonymous_id: &anonymous_id,
            pdf_source: Some(&source_key),
            created_at: now,
        },
    )
    .await?;

    let rasterize_task_id = Uuid::new_v4().to_string();
    let mut tx = state.db().begin().await?;

    let mut booklet_ids = Vec::new();
    for (position, (start_page, end_page)) in
        booklet_ranges(exam.upload_mode, pages).into_iter().enumerate()
    {
        let booklet = repositories::booklets::create(
            &mut tx,
            repositories::booklets::CreateBooklet {
                id: &Uuid::new_v4().to_string(),
                exam_id,
                start_page: start_page as i32,
                end_page: end_page as i32,
                created_at: now,
            },
        )
        .await?;
        repositories::booklets::attach_to_copy(&mut tx, &copy_id, &booklet.id, position as i32)
            .await?;
        booklet_ids.push(booklet.id);
    }

    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id: &copy_id,
            actor_id: Some(actor_id),
            action: GradingAction::Import,
            metadata: serde_json::json!({
                "pages": pages,
                "booklets": booklet_ids.len(),
                "anonymous_id": anonymous_id,
            }),
            created_at: now,
        },
    )
    .await?;
    repositories::tasks::enqueue(&mut tx, &rasterize_task_id, TaskKind::Rasterize, &copy_id, now)
        .await?;
    tx.commit().await?;

    Ok(ImportOutcome { copy, booklet_ids, rasterize_task_id })
}

/// 1-indexed inclusive page ranges per booklet.
pub(crate) fn booklet_ranges(mode: UploadMode, pages: usize) -> Vec<(usize, usize)> {
    match mode {
        UploadMode::IndividualA4 => vec![(1, pages)],
        UploadMode::BatchA3 => {
            let mut ranges = Vec::new();
            let mut start = 1;
            while start <= pages {
                let end = (start + BATCH_A3_PAGES_PER_BOOKLET - 1).min(pages);
                ranges.push((start, end));
                start = end + 1;
            }
            ranges
        }
    }
}

/// Sequential per-exam ids, retried past unique-key collisions left behind by
/// reaped copies.
async fn allocate_anonymous_id(state: &AppState, exam_id: &str) -> Result<String, ImportError> {
    let base = repositories::copies::next_anonymous_seq(state.db(), exam_id).await? + 1;
    for offset in 0..100 {
        let candidate = format!("C-{:03}", base + offset);
        let taken = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM copies WHERE exam_id = $1 AND anonymous_id = $2",
        )
        .bind(exam_id)
        .bind(&candidate)
        .fetch_one(state.db())
        .await?;
        if taken == 0 {
            return Ok(candidate);
        }
    }
    Ok(format!("C-{}", Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn individual_upload_is_one_booklet() {
        assert_eq!(booklet_ranges(UploadMode::IndividualA4, 6), vec![(1, 6)]);
        assert_eq!(booklet_ranges(UploadMode::IndividualA4, 1), vec![(1, 1)]);
    }

    #[test]
    fn batch_upload_splits_on_sheet_boundaries() {
        assert_eq!(booklet_ranges(UploadMode::BatchA3, 8), vec![(1, 4), (5, 8)]);
        assert_eq!(booklet_ranges(UploadMode::BatchA3, 4), vec![(1, 4)]);
        // A trailing partial sheet still becomes a booklet.
        assert_eq!(booklet_ranges(UploadMode::BatchA3, 6), vec![(1, 4), (5, 6)]);
    }

    #[test]
    fn batch_upload_of_zero_pages_yields_nothing() {
        assert!(booklet_ranges(UploadMode::BatchA3, 0).is_empty());
    }
}
