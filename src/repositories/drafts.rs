use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::DraftState;

const COLUMNS: &str = "copy_id, owner_id, payload, updated_at";

pub(crate) async fn find(
    pool: &PgPool,
    copy_id: &str,
    owner_id: &str,
) -> Result<Option<DraftState>, sqlx::Error> {
    sqlx::query_as::<_, DraftState>(&format!(
        "SELECT {COLUMNS} FROM draft_states WHERE copy_id = $1 AND owner_id = $2",
    ))
    .bind(copy_id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn upsert(
    pool: &PgPool,
    copy_id: &str,
    owner_id: &str,
    payload: serde_json::Value,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO draft_states (copy_id, owner_id, payload, updated_at)
         VALUES ($1,$2,$3,$4)
         ON CONFLICT (copy_id, owner_id) DO UPDATE
         SET payload = EXCLUDED.payload, updated_at = EXCLUDED.updated_at",
    )
    .bind(copy_id)
    .bind(owner_id)
    .bind(sqlx::types::Json(payload))
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn delete(
    pool: &PgPool,
    copy_id: &str,
    owner_id: &str,
) -> Result<bool, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM draft_states WHERE copy_id = $1 AND owner_id = $2")
        .bind(copy_id)
        .bind(owner_id)
        .execute(pool)
        .await?;
    Ok(deleted.rows_affected() > 0)
}

/// Reaper sweep: drop drafts untouched past the TTL, return how many went.
pub(crate) async fn delete_older_than(
    pool: &PgPool,
    cutoff: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM draft_states WHERE updated_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(deleted.rows_affected())
}
