use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use time::PrimitiveDateTime;

use crate::db::models::Booklet;

const COLUMNS: &str = "id, exam_id, start_page, end_page, pages_images, created_at";

pub(crate) struct CreateBooklet<'a> {
    pub id: &'a str,
    pub exam_id: &'a str,
    pub start_page: i32,
    pub end_page: i32,
    pub created_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    tx: &mut Transaction<'_, Postgres>,
    params: CreateBooklet<'_>,
) -> Result<Booklet, sqlx::Error> {
    sqlx::query_as::<_, Booklet>(&format!(
        "INSERT INTO booklets (id, exam_id, start_page, end_page, pages_images, created_at)
         VALUES ($1,$2,$3,$4,'[]',$5)
         RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.exam_id)
    .bind(params.start_page)
    .bind(params.end_page)
    .bind(params.created_at)
    .fetch_one(&mut **tx)
    .await
}

pub(crate) async fn attach_to_copy(
    tx: &mut Transaction<'_, Postgres>,
    copy_id: &str,
    booklet_id: &str,
    position: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO copy_booklets (copy_id, booklet_id, position) VALUES ($1,$2,$3)
         ON CONFLICT (copy_id, booklet_id) DO NOTHING",
    )
    .bind(copy_id)
    .bind(booklet_id)
    .bind(position)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Booklets of a copy in reading order.
pub(crate) async fn list_for_copy(
    pool: &PgPool,
    copy_id: &str,
) -> Result<Vec<Booklet>, sqlx::Error> {
    sqlx::query_as::<_, Booklet>(
        "SELECT b.id, b.exam_id, b.start_page, b.end_page, b.pages_images, b.created_at
         FROM booklets b
         JOIN copy_booklets cb ON cb.booklet_id = b.id
         WHERE cb.copy_id = $1
         ORDER BY cb.position, b.start_page",
    )
    .bind(copy_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn set_pages_images(
    pool: &PgPool,
    booklet_id: &str,
    pages_images: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE booklets SET pages_images = $1 WHERE id = $2")
        .bind(Json(pages_images))
        .bind(booklet_id)
        .execute(pool)
        .await?;
    Ok(())
}
