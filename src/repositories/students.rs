use sqlx::PgPool;
use time::Date;

use crate::db::models::Student;

const COLUMNS: &str = "id, last_name, first_name, date_of_birth, class_name, created_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!("SELECT {COLUMNS} FROM students WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Enrollment list for an exam's matching pass. Today the whole roster is the
/// candidate pool; a per-exam enrollment link can narrow this later.
pub(crate) async fn list_all(pool: &PgPool) -> Result<Vec<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!(
        "SELECT {COLUMNS} FROM students ORDER BY last_name, first_name"
    ))
    .fetch_all(pool)
    .await
}

pub(crate) struct CreateStudent<'a> {
    pub id: &'a str,
    pub last_name: &'a str,
    pub first_name: &'a str,
    pub date_of_birth: Date,
    pub class_name: &'a str,
    pub created_at: time::PrimitiveDateTime,
}

pub(crate) async fn create(
    pool: &PgPool,
    params: CreateStudent<'_>,
) -> Result<Student, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!(
        "INSERT INTO students (id, last_name, first_name, date_of_birth, class_name, created_at)
         VALUES ($1,$2,$3,$4,$5,$6)
         RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.last_name)
    .bind(params.first_name)
    .bind(params.date_of_birth)
    .bind(params.class_name)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}
