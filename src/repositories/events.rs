use sqlx::{PgPool, Postgres, Transaction};
use time::PrimitiveDateTime;

use crate::db::models::GradingEvent;
use crate::db::types::GradingAction;

const COLUMNS: &str = "id, copy_id, actor_id, action, metadata, created_at";

pub(crate) struct AppendEvent<'a> {
    pub id: &'a str,
    pub copy_id: &'a str,
    pub actor_id: Option<&'a str>,
    pub action: GradingAction,
    pub metadata: serde_json::Value,
    pub created_at: PrimitiveDateTime,
}

/// Append-only; events are never updated or deleted.
pub(crate) async fn append(
    tx: &mut Transaction<'_, Postgres>,
    params: AppendEvent<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO grading_events (id, copy_id, actor_id, action, metadata, created_at)
         VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(params.id)
    .bind(params.copy_id)
    .bind(params.actor_id)
    .bind(params.action)
    .bind(sqlx::types::Json(params.metadata))
    .bind(params.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Newest first.
pub(crate) async fn list_for_copy(
    pool: &PgPool,
    copy_id: &str,
    limit: i64,
) -> Result<Vec<GradingEvent>, sqlx::Error> {
    sqlx::query_as::<_, GradingEvent>(&format!(
        "SELECT {COLUMNS} FROM grading_events
         WHERE copy_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT $2",
    ))
    .bind(copy_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
