use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Annotation;
use crate::db::types::AnnotationKind;

const COLUMNS: &str = "\
    id, copy_id, page_index, x, y, w, h, kind, content, score_delta, \
    created_by, created_at, updated_at";

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<Annotation>, sqlx::Error> {
    sqlx::query_as::<_, Annotation>(&format!("SELECT {COLUMNS} FROM annotations WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_for_copy(
    pool: &PgPool,
    copy_id: &str,
) -> Result<Vec<Annotation>, sqlx::Error> {
    sqlx::query_as::<_, Annotation>(&format!(
        "SELECT {COLUMNS} FROM annotations
         WHERE copy_id = $1
         ORDER BY page_index, created_at",
    ))
    .bind(copy_id)
    .fetch_all(pool)
    .await
}

pub(crate) struct CreateAnnotation<'a> {
    pub id: &'a str,
    pub copy_id: &'a str,
    pub page_index: i32,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub kind: AnnotationKind,
    pub content: &'a str,
    pub score_delta: Option<i32>,
    pub created_by: &'a str,
    pub created_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    pool: &PgPool,
    params: CreateAnnotation<'_>,
) -> Result<Annotation, sqlx::Error> {
    sqlx::query_as::<_, Annotation>(&format!(
        "INSERT INTO annotations (
            id, copy_id, page_index, x, y, w, h, kind, content, score_delta,
            created_by, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$12)
        RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.copy_id)
    .bind(params.page_index)
    .bind(params.x)
    .bind(params.y)
    .bind(params.w)
    .bind(params.h)
    .bind(params.kind)
    .bind(params.content)
    .bind(params.score_delta)
    .bind(params.created_by)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) struct UpdateAnnotation<'a> {
    pub page_index: Option<i32>,
    pub rect: Option<(f64, f64, f64, f64)>,
    pub kind: Option<AnnotationKind>,
    pub content: Option<&'a str>,
    pub score_delta: Option<Option<i32>>,
    pub updated_at: PrimitiveDateTime,
}

pub(crate) async fn update(
    pool: &PgPool,
    id: &str,
    params: UpdateAnnotation<'_>,
) -> Result<Option<Annotation>, sqlx::Error> {
    let (x, y, w, h) = match params.rect {
        Some((x, y, w, h)) => (Some(x), Some(y), Some(w), Some(h)),
        None => (None, None, None, None),
    };

    // score_delta distinguishes "leave as is" (outer None) from "clear" (Some(None)).
    let (set_score_delta, score_delta) = match params.score_delta {
        Some(value) => (true, value),
        None => (false, None),
    };

    sqlx::query_as::<_, Annotation>(&format!(
        "UPDATE annotations SET
            page_index = COALESCE($1, page_index),
            x = COALESCE($2, x),
            y = COALESCE($3, y),
            w = COALESCE($4, w),
            h = COALESCE($5, h),
            kind = COALESCE($6, kind),
            content = COALESCE($7, content),
            score_delta = CASE WHEN $8 THEN $9 ELSE score_delta END,
            updated_at = $10
         WHERE id = $11
         RETURNING {COLUMNS}",
    ))
    .bind(params.page_index)
    .bind(x)
    .bind(y)
    .bind(w)
    .bind(h)
    .bind(params.kind)
    .bind(params.content)
    .bind(set_score_delta)
    .bind(score_delta)
    .bind(params.updated_at)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn delete(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM annotations WHERE id = $1").bind(id).execute(pool).await?;
    Ok(deleted.rows_affected() > 0)
}

pub(crate) async fn sum_score_deltas(pool: &PgPool, copy_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(score_delta), 0)::bigint FROM annotations
         WHERE copy_id = $1 AND score_delta IS NOT NULL",
    )
    .bind(copy_id)
    .fetch_one(pool)
    .await
}
