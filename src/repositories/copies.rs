use sqlx::{PgPool, Postgres, Transaction};
use time::PrimitiveDateTime;

use crate::db::models::Copy;
use crate::db::types::CopyStatus;

const COLUMNS: &str = "\
    id, exam_id, anonymous_id, status, student_id, is_identified, \
    assigned_corrector, dispatch_run_id, assigned_at, locked_by, locked_at, \
    pdf_source, final_pdf, global_appreciation, llm_summary, \
    created_at, updated_at, graded_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Copy>, sqlx::Error> {
    sqlx::query_as::<_, Copy>(&format!("SELECT {COLUMNS} FROM copies WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Row-locked fetch used by every state transition; serializes writers on the
/// same copy within their transactions.
pub(crate) async fn find_by_id_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
) -> Result<Option<Copy>, sqlx::Error> {
    sqlx::query_as::<_, Copy>(&format!("SELECT {COLUMNS} FROM copies WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

/// Corrector-facing listing. QUARANTINE copies never appear here.
pub(crate) async fn list_for_exam_visible(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<Copy>, sqlx::Error> {
    sqlx::query_as::<_, Copy>(&format!(
        "SELECT {COLUMNS} FROM copies
         WHERE exam_id = $1 AND status <> $2
         ORDER BY anonymous_id",
    ))
    .bind(exam_id)
    .bind(CopyStatus::Quarantine)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_ready_ids_for_dispatch(
    tx: &mut Transaction<'_, Postgres>,
    exam_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT id FROM copies WHERE exam_id = $1 AND status = $2 ORDER BY id",
    )
    .bind(exam_id)
    .bind(CopyStatus::Ready)
    .fetch_all(&mut **tx)
    .await
}

pub(crate) struct CreateCopy<'a> {
    pub id: &'a str,
    pub exam_id: &'a str,
    pub anonymous_id: &'a str,
    pub pdf_source: Option<&'a str>,
    pub created_at: PrimitiveDateTime,
}

pub(crate) async fn create_staging(
    pool: &PgPool,
    params: CreateCopy<'_>,
) -> Result<Copy, sqlx::Error> {
    sqlx::query_as::<_, Copy>(&format!(
        "INSERT INTO copies (id, exam_id, anonymous_id, status, pdf_source, created_at, updated_at)
         VALUES ($1,$2,$3,$4,$5,$6,$6)
         RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.exam_id)
    .bind(params.anonymous_id)
    .bind(CopyStatus::Staging)
    .bind(params.pdf_source)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    status: CopyStatus,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE copies SET status = $1, updated_at = $2 WHERE id = $3")
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub(crate) async fn set_locked_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    locked_by: Option<&str>,
    locked_at: Option<PrimitiveDateTime>,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE copies SET locked_by = $1, locked_at = $2, updated_at = $3 WHERE id = $4",
    )
    .bind(locked_by)
    .bind(locked_at)
    .bind(now)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn mark_graded(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    final_pdf: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE copies
         SET status = $1, final_pdf = $2, graded_at = $3,
             locked_by = NULL, locked_at = NULL, updated_at = $3
         WHERE id = $4",
    )
    .bind(CopyStatus::Graded)
    .bind(final_pdf)
    .bind(now)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn set_global_appreciation(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    appreciation: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE copies SET global_appreciation = $1, updated_at = $2 WHERE id = $3")
        .bind(appreciation)
        .bind(now)
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub(crate) async fn set_student(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    student_id: Option<&str>,
    is_identified: bool,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE copies
         SET student_id = $1, is_identified = $2, updated_at = $3
         WHERE id = $4",
    )
    .bind(student_id)
    .bind(is_identified)
    .bind(now)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn assign_corrector(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    corrector_id: &str,
    dispatch_run_id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE copies
         SET assigned_corrector = $1, dispatch_run_id = $2, assigned_at = $3, updated_at = $3
         WHERE id = $4",
    )
    .bind(corrector_id)
    .bind(dispatch_run_id)
    .bind(now)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn next_anonymous_seq(
    pool: &PgPool,
    exam_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM copies WHERE exam_id = $1")
        .bind(exam_id)
        .fetch_one(pool)
        .await
}

pub(crate) async fn booklet_page_count(pool: &PgPool, copy_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(jsonb_array_length(b.pages_images)), 0)::bigint
         FROM booklets b
         JOIN copy_booklets cb ON cb.booklet_id = b.id
         WHERE cb.copy_id = $1",
    )
    .bind(copy_id)
    .fetch_one(pool)
    .await
}

/// STAGING copies older than the reaper threshold, with their booklet count.
pub(crate) async fn list_stale_staging(
    pool: &PgPool,
    older_than: PrimitiveDateTime,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>(
        "SELECT c.id, COUNT(cb.booklet_id)
         FROM copies c
         LEFT JOIN copy_booklets cb ON cb.copy_id = c.id
         WHERE c.status = $1 AND c.created_at < $2
         GROUP BY c.id
         ORDER BY c.id",
    )
    .bind(CopyStatus::Staging)
    .bind(older_than)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_expired_locked(
    pool: &PgPool,
    expired_before: PrimitiveDateTime,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT c.id
         FROM copies c
         JOIN copy_locks l ON l.copy_id = c.id
         WHERE c.status = $1 AND l.expires_at < $2
         ORDER BY c.id",
    )
    .bind(CopyStatus::Locked)
    .bind(expired_before)
    .fetch_all(pool)
    .await
}

pub(crate) async fn delete(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM copies WHERE id = $1").bind(id).execute(pool).await?;
    Ok(())
}

pub(crate) async fn advisory_lock_exam(
    tx: &mut Transaction<'_, Postgres>,
    exam_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(exam_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
