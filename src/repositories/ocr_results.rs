use sqlx::{PgPool, Postgres, Transaction};
use time::PrimitiveDateTime;

use crate::db::models::OcrResult;
use crate::db::types::{CrossValidation, OcrMode};

const COLUMNS: &str = "\
    copy_id, header_text, confidence, ocr_mode, top_candidates, chosen_rank, \
    manual_override, cross_validation, updated_at";

pub(crate) async fn find_by_copy(
    pool: &PgPool,
    copy_id: &str,
) -> Result<Option<OcrResult>, sqlx::Error> {
    sqlx::query_as::<_, OcrResult>(&format!(
        "SELECT {COLUMNS} FROM ocr_results WHERE copy_id = $1",
    ))
    .bind(copy_id)
    .fetch_optional(pool)
    .await
}

pub(crate) struct UpsertOcrResult<'a> {
    pub copy_id: &'a str,
    pub header_text: Option<&'a str>,
    pub confidence: Option<f64>,
    pub ocr_mode: OcrMode,
    pub top_candidates: serde_json::Value,
    pub chosen_rank: Option<i32>,
    pub cross_validation: Option<CrossValidation>,
    pub now: PrimitiveDateTime,
}

/// One result per copy; re-running identification replaces the previous row
/// and clears any manual choice.
pub(crate) async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    params: UpsertOcrResult<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ocr_results (
            copy_id, header_text, confidence, ocr_mode, top_candidates, chosen_rank,
            manual_override, cross_validation, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,FALSE,$7,$8)
        ON CONFLICT (copy_id) DO UPDATE
        SET header_text = EXCLUDED.header_text,
            confidence = EXCLUDED.confidence,
            ocr_mode = EXCLUDED.ocr_mode,
            top_candidates = EXCLUDED.top_candidates,
            chosen_rank = EXCLUDED.chosen_rank,
            manual_override = FALSE,
            cross_validation = EXCLUDED.cross_validation,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(params.copy_id)
    .bind(params.header_text)
    .bind(params.confidence)
    .bind(params.ocr_mode)
    .bind(sqlx::types::Json(params.top_candidates))
    .bind(params.chosen_rank)
    .bind(params.cross_validation)
    .bind(params.now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn record_choice(
    tx: &mut Transaction<'_, Postgres>,
    copy_id: &str,
    chosen_rank: Option<i32>,
    manual_override: bool,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE ocr_results
         SET chosen_rank = $1, manual_override = $2, ocr_mode = $3, updated_at = $4
         WHERE copy_id = $5",
    )
    .bind(chosen_rank)
    .bind(manual_override)
    .bind(if manual_override { OcrMode::Manual } else { OcrMode::SemiAuto })
    .bind(now)
    .bind(copy_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn clear_choice(
    tx: &mut Transaction<'_, Postgres>,
    copy_id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE ocr_results
         SET chosen_rank = NULL, manual_override = FALSE, updated_at = $1
         WHERE copy_id = $2",
    )
    .bind(now)
    .bind(copy_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
