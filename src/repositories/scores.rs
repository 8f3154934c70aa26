use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::QuestionScore;

const COLUMNS: &str = "id, copy_id, question_id, score, updated_by, created_at, updated_at";

pub(crate) async fn list_for_copy(
    pool: &PgPool,
    copy_id: &str,
) -> Result<Vec<QuestionScore>, sqlx::Error> {
    sqlx::query_as::<_, QuestionScore>(&format!(
        "SELECT {COLUMNS} FROM question_scores WHERE copy_id = $1 ORDER BY question_id",
    ))
    .bind(copy_id)
    .fetch_all(pool)
    .await
}

pub(crate) struct UpsertScore<'a> {
    pub id: &'a str,
    pub copy_id: &'a str,
    pub question_id: &'a str,
    pub score: f64,
    pub updated_by: &'a str,
    pub now: PrimitiveDateTime,
}

/// One score per (copy, question); a re-grade overwrites in place.
pub(crate) async fn upsert(
    pool: &PgPool,
    params: UpsertScore<'_>,
) -> Result<QuestionScore, sqlx::Error> {
    sqlx::query_as::<_, QuestionScore>(&format!(
        "INSERT INTO question_scores (
            id, copy_id, question_id, score, updated_by, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$6)
        ON CONFLICT (copy_id, question_id) DO UPDATE
        SET score = EXCLUDED.score,
            updated_by = EXCLUDED.updated_by,
            updated_at = EXCLUDED.updated_at
        RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.copy_id)
    .bind(params.question_id)
    .bind(params.score)
    .bind(params.updated_by)
    .bind(params.now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn delete(
    pool: &PgPool,
    copy_id: &str,
    question_id: &str,
) -> Result<bool, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM question_scores WHERE copy_id = $1 AND question_id = $2")
        .bind(copy_id)
        .bind(question_id)
        .execute(pool)
        .await?;
    Ok(deleted.rows_affected() > 0)
}
