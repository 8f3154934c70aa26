use sqlx::types::Json;
use sqlx::PgPool;
use time::{Date, PrimitiveDateTime};

use crate::db::models::Exam;
use crate::db::types::UploadMode;

const COLUMNS: &str = "\
    id, name, exam_date, upload_mode, grading_structure, total_points, \
    results_released_at, created_by, created_at, updated_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_for_teacher(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "SELECT {COLUMNS} FROM exams
         WHERE created_by = $1
            OR id IN (SELECT exam_id FROM exam_correctors WHERE user_id = $1)
         ORDER BY created_at DESC",
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub(crate) struct CreateExam<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub exam_date: Date,
    pub upload_mode: UploadMode,
    pub grading_structure: Option<serde_json::Value>,
    pub total_points: Option<f64>,
    pub created_by: &'a str,
    pub created_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, params: CreateExam<'_>) -> Result<Exam, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "INSERT INTO exams (
            id, name, exam_date, upload_mode, grading_structure, total_points,
            created_by, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$8)
        RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.name)
    .bind(params.exam_date)
    .bind(params.upload_mode)
    .bind(params.grading_structure.map(Json))
    .bind(params.total_points)
    .bind(params.created_by)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn add_corrector(
    pool: &PgPool,
    exam_id: &str,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO exam_correctors (exam_id, user_id) VALUES ($1, $2)
         ON CONFLICT (exam_id, user_id) DO NOTHING",
    )
    .bind(exam_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn list_correctors(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM exam_correctors WHERE exam_id = $1 ORDER BY user_id",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn release_results(
    pool: &PgPool,
    exam_id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE exams SET results_released_at = $1, updated_at = $1
         WHERE id = $2 AND results_released_at IS NULL",
    )
    .bind(now)
    .bind(exam_id)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}
