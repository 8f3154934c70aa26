use sqlx::{PgPool, Postgres, Transaction};
use time::PrimitiveDateTime;

use crate::db::models::CopyLock;

const COLUMNS: &str = "copy_id, owner_id, token, acquired_at, expires_at";

pub(crate) async fn find_by_copy(
    pool: &PgPool,
    copy_id: &str,
) -> Result<Option<CopyLock>, sqlx::Error> {
    sqlx::query_as::<_, CopyLock>(&format!(
        "SELECT {COLUMNS} FROM copy_locks WHERE copy_id = $1"
    ))
    .bind(copy_id)
    .fetch_optional(pool)
    .await
}

/// Row-locked fetch; all acquire/heartbeat/release decisions read through
/// this inside a transaction so concurrent acquirers serialize.
pub(crate) async fn find_by_copy_for_update(
    tx: &mut Transaction<'_, Postgres>,
    copy_id: &str,
) -> Result<Option<CopyLock>, sqlx::Error> {
    sqlx::query_as::<_, CopyLock>(&format!(
        "SELECT {COLUMNS} FROM copy_locks WHERE copy_id = $1 FOR UPDATE"
    ))
    .bind(copy_id)
    .fetch_optional(&mut **tx)
    .await
}

pub(crate) async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    copy_id: &str,
    owner_id: &str,
    token: &str,
    acquired_at: PrimitiveDateTime,
    expires_at: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO copy_locks (copy_id, owner_id, token, acquired_at, expires_at)
         VALUES ($1,$2,$3,$4,$5)
         ON CONFLICT (copy_id) DO UPDATE
         SET owner_id = EXCLUDED.owner_id,
             token = EXCLUDED.token,
             acquired_at = EXCLUDED.acquired_at,
             expires_at = EXCLUDED.expires_at",
    )
    .bind(copy_id)
    .bind(owner_id)
    .bind(token)
    .bind(acquired_at)
    .bind(expires_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn extend(
    tx: &mut Transaction<'_, Postgres>,
    copy_id: &str,
    expires_at: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE copy_locks SET expires_at = $1 WHERE copy_id = $2")
        .bind(expires_at)
        .bind(copy_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub(crate) async fn delete(
    tx: &mut Transaction<'_, Postgres>,
    copy_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM copy_locks WHERE copy_id = $1")
        .bind(copy_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
