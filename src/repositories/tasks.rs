use sqlx::{PgPool, Postgres, Transaction};
use time::PrimitiveDateTime;

use crate::db::models::BackgroundTask;
use crate::db::types::{TaskKind, TaskStatus};

const COLUMNS: &str = "\
    id, kind, copy_id, status, detail, attempts, created_at, started_at, finished_at";

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<BackgroundTask>, sqlx::Error> {
    sqlx::query_as::<_, BackgroundTask>(&format!(
        "SELECT {COLUMNS} FROM background_tasks WHERE id = $1",
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn enqueue(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    kind: TaskKind,
    copy_id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO background_tasks (id, kind, copy_id, status, attempts, created_at)
         VALUES ($1,$2,$3,$4,0,$5)",
    )
    .bind(id)
    .bind(kind)
    .bind(copy_id)
    .bind(TaskStatus::Queued)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Claim the oldest queued task. SKIP LOCKED lets concurrent workers each
/// grab a different row without blocking on one another.
pub(crate) async fn claim_next(
    tx: &mut Transaction<'_, Postgres>,
    now: PrimitiveDateTime,
) -> Result<Option<BackgroundTask>, sqlx::Error> {
    let claimed = sqlx::query_as::<_, BackgroundTask>(&format!(
        "SELECT {COLUMNS} FROM background_tasks
         WHERE status = $1
         ORDER BY created_at
         LIMIT 1
         FOR UPDATE SKIP LOCKED",
    ))
    .bind(TaskStatus::Queued)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(task) = claimed else {
        return Ok(None);
    };

    sqlx::query(
        "UPDATE background_tasks
         SET status = $1, attempts = attempts + 1, started_at = $2
         WHERE id = $3",
    )
    .bind(TaskStatus::Running)
    .bind(now)
    .bind(&task.id)
    .execute(&mut **tx)
    .await?;

    Ok(Some(task))
}

pub(crate) async fn mark_success(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE background_tasks SET status = $1, detail = NULL, finished_at = $2 WHERE id = $3",
    )
    .bind(TaskStatus::Success)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn mark_error(
    pool: &PgPool,
    id: &str,
    detail: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE background_tasks SET status = $1, detail = $2, finished_at = $3 WHERE id = $4",
    )
    .bind(TaskStatus::Error)
    .bind(detail)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}
