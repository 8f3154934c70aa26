use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{self, CurrentAdmin, CurrentTeacher, CurrentUser};
use crate::api::validation;
use crate::core::state::AppState;
use crate::core::time::{format_primitive, primitive_now_utc};
use crate::db::models::Copy;
use crate::db::types::{CopyStatus, GradingAction, UserRole};
use crate::repositories;
use crate::schemas::exam::CopySummaryResponse;
use crate::schemas::grading::{
    AnnotationCreate, AnnotationResponse, AnnotationUpdate, DraftPut, DraftResponse,
    EventResponse, FinalizeRequest, FinalizeResponse, HeartbeatResponse, LockRequest,
    LockResponse, QuarantineRequest, ScoreListResponse, ScoreResponse, ScoreUpsert,
    TaskResponse,
};
use crate::services::{lifecycle, locks, scoring};

const DEFAULT_EVENT_LIMIT: i64 = 50;
const MAX_EVENT_LIMIT: i64 = 500;
const FINAL_PDF_URL_TTL_SECONDS: u64 = 600;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:copy_id", get(get_copy))
        .route("/:copy_id/lock", post(acquire_lock))
        .route("/:copy_id/lock/heartbeat", post(heartbeat))
        .route("/:copy_id/lock/release", delete(release_lock))
        .route("/:copy_id/annotations", post(create_annotation).get(list_annotations))
        .route("/:copy_id/scores", put(upsert_score).get(list_scores))
        .route("/:copy_id/scores/:question_id", delete(delete_score))
        .route("/:copy_id/finalize", post(finalize))
        .route("/:copy_id/final-pdf", get(final_pdf))
        .route("/:copy_id/draft", put(put_draft).get(get_draft).delete(delete_draft))
        .route("/:copy_id/events", get(list_events))
        .route("/:copy_id/ready", post(validate_copy))
        .route("/:copy_id/quarantine", post(quarantine_copy))
        .route("/:copy_id/quarantine/release", post(release_from_quarantine))
        .route("/:copy_id/reset", post(reset_to_staging))
}

async fn get_copy(
    State(state): State<AppState>,
    CurrentTeacher(_user): CurrentTeacher,
    Path(copy_id): Path<String>,
) -> Result<Json<CopySummaryResponse>, ApiError> {
    let copy = fetch_copy(&state, &copy_id).await?;
    Ok(Json(CopySummaryResponse::from(&copy)))
}

// Locking

async fn acquire_lock(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
    payload: Option<Json<LockRequest>>,
) -> Result<(StatusCode, Json<LockResponse>), ApiError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let ttl = locks::resolve_ttl(
        request.ttl_seconds.as_ref(),
        state.settings().locks().default_ttl_seconds as i64,
        state.settings().locks().max_ttl_seconds as i64,
    )?;

    let outcome = locks::acquire(&state, &copy_id, &user.id, ttl).await?;
    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };

    Ok((
        status,
        Json(LockResponse {
            copy_id,
            token: outcome.token,
            expires_at: format_primitive(outcome.expires_at),
        }),
    ))
}

async fn heartbeat(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let token = guards::require_lock_token(&headers)?;
    let expires_at = locks::heartbeat(&state, &copy_id, &user.id, token).await?;

    Ok(Json(HeartbeatResponse { copy_id, expires_at: format_primitive(expires_at) }))
}

#[derive(Debug, Default, Deserialize)]
struct ReleaseQuery {
    #[serde(default)]
    force: bool,
}

/// Release is idempotent; an admin can pass `?force=true` to break another
/// user's lock.
async fn release_lock(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
    Query(query): Query<ReleaseQuery>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    if query.force && user.role != UserRole::Admin {
        return Err(ApiError::Forbidden("Only admins can force-release a lock".to_string()));
    }

    fetch_copy(&state, &copy_id).await?;
    locks::release(&state, &copy_id, &user.id, guards::lock_token(&headers), query.force)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// Annotations

async fn create_annotation(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<AnnotationCreate>,
) -> Result<(StatusCode, Json<AnnotationResponse>), ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;
    validation::check_rect(payload.x, payload.y, payload.w, payload.h)?;
    require_mutable(&state, &copy_id, &user.id, &headers).await?;
    validation::check_page_index(&state, &copy_id, payload.page_index).await?;

    let annotation = repositories::annotations::create(
        state.db(),
        repositories::annotations::CreateAnnotation {
            id: &Uuid::new_v4().to_string(),
            copy_id: &copy_id,
            page_index: payload.page_index,
            x: payload.x,
            y: payload.y,
            w: payload.w,
            h: payload.h,
            kind: payload.kind,
            content: &payload.content,
            score_delta: payload.score_delta,
            created_by: &user.id,
            created_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create annotation"))?;

    Ok((StatusCode::CREATED, Json(AnnotationResponse::from(&annotation))))
}

async fn list_annotations(
    State(state): State<AppState>,
    CurrentTeacher(_user): CurrentTeacher,
    Path(copy_id): Path<String>,
) -> Result<Json<Vec<AnnotationResponse>>, ApiError> {
    fetch_copy(&state, &copy_id).await?;

    let annotations = repositories::annotations::list_for_copy(state.db(), &copy_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list annotations"))?;

    Ok(Json(annotations.iter().map(AnnotationResponse::from).collect()))
}

/// Mounted flat under /grading/annotations; the copy is resolved from the
/// annotation row before the lock gate runs.
pub(crate) async fn update_annotation(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(annotation_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<AnnotationUpdate>,
) -> Result<Json<AnnotationResponse>, ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let existing = repositories::annotations::find_by_id(state.db(), &annotation_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load annotation"))?
        .ok_or_else(|| ApiError::NotFound("Annotation not found".to_string()))?;
    let copy_id = existing.copy_id.clone();
    require_mutable(&state, &copy_id, &user.id, &headers).await?;

    // The resulting rectangle must stay inside the page even on partial
    // updates.
    let x = payload.x.unwrap_or(existing.x);
    let y = payload.y.unwrap_or(existing.y);
    let w = payload.w.unwrap_or(existing.w);
    let h = payload.h.unwrap_or(existing.h);
    validation::check_rect(x, y, w, h)?;
    if let Some(page_index) = payload.page_index {
        validation::check_page_index(&state, &copy_id, page_index).await?;
    }

    let rect = (payload.x.is_some()
        || payload.y.is_some()
        || payload.w.is_some()
        || payload.h.is_some())
    .then_some((x, y, w, h));

    let updated = repositories::annotations::update(
        state.db(),
        &annotation_id,
        repositories::annotations::UpdateAnnotation {
            page_index: payload.page_index,
            rect,
            kind: payload.kind,
            content: payload.content.as_deref(),
            score_delta: payload.score_delta,
            updated_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update annotation"))?
    .ok_or_else(|| ApiError::NotFound("Annotation not found".to_string()))?;

    Ok(Json(AnnotationResponse::from(&updated)))
}

pub(crate) async fn delete_annotation(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(annotation_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let existing = repositories::annotations::find_by_id(state.db(), &annotation_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load annotation"))?
        .ok_or_else(|| ApiError::NotFound("Annotation not found".to_string()))?;
    require_mutable(&state, &existing.copy_id, &user.id, &headers).await?;

    repositories::annotations::delete(state.db(), &annotation_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete annotation"))?;

    Ok(StatusCode::NO_CONTENT)
}

// Scores

async fn upsert_score(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ScoreUpsert>,
) -> Result<Json<ScoreResponse>, ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;
    if !payload.score.is_finite() || payload.score < 0.0 {
        return Err(ApiError::BadRequest("score must be a non-negative number".to_string()));
    }
    require_mutable(&state, &copy_id, &user.id, &headers).await?;

    let now = primitive_now_utc();
    let score = repositories::scores::upsert(
        state.db(),
        repositories::scores::UpsertScore {
            id: &Uuid::new_v4().to_string(),
            copy_id: &copy_id,
            question_id: &payload.question_id,
            score: payload.score,
            updated_by: &user.id,
            now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to save score"))?;

    append_grade_event(
        &state,
        &copy_id,
        &user.id,
        serde_json::json!({ "question_id": payload.question_id, "score": payload.score }),
    )
    .await?;

    Ok(Json(ScoreResponse::from(&score)))
}

async fn list_scores(
    State(state): State<AppState>,
    CurrentTeacher(_user): CurrentTeacher,
    Path(copy_id): Path<String>,
) -> Result<Json<ScoreListResponse>, ApiError> {
    fetch_copy(&state, &copy_id).await?;

    let scores = repositories::scores::list_for_copy(state.db(), &copy_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list scores"))?;
    let total = scoring::compute_score(state.db(), &copy_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to compute score"))?;

    Ok(Json(ScoreListResponse {
        copy_id,
        scores: scores.iter().map(ScoreResponse::from).collect(),
        total,
    }))
}

async fn delete_score(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path((copy_id, question_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_mutable(&state, &copy_id, &user.id, &headers).await?;

    let deleted = repositories::scores::delete(state.db(), &copy_id, &question_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete score"))?;
    if !deleted {
        return Err(ApiError::NotFound("Score not found".to_string()));
    }

    append_grade_event(
        &state,
        &copy_id,
        &user.id,
        serde_json::json!({ "question_id": question_id, "score": null }),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

// Finalization

async fn finalize(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
    headers: HeaderMap,
    payload: Option<Json<FinalizeRequest>>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let token = guards::require_lock_token(&headers)?;
    let request = payload.map(|Json(body)| body).unwrap_or_default();

    let outcome = lifecycle::finalize_copy(
        &state,
        &copy_id,
        &user.id,
        token,
        request.global_appreciation.as_deref(),
    )
    .await?;

    Ok(Json(FinalizeResponse {
        copy_id,
        status: CopyStatus::Graded,
        final_pdf: outcome.final_pdf,
        score: outcome.score,
        graded_at: format_primitive(outcome.graded_at),
    }))
}

/// Redirects to a short-lived presigned URL for the flattened PDF. Teachers
/// and admins always; a student only for their own copy once the exam's
/// results are released.
async fn final_pdf(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(copy_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let copy = fetch_copy(&state, &copy_id).await?;

    if user.role == UserRole::Student {
        let owns = user.student_ref.is_some() && user.student_ref == copy.student_id;
        if !owns {
            return Err(ApiError::Forbidden("Not your copy".to_string()));
        }

        let exam = repositories::exams::find_by_id(state.db(), &copy.exam_id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to load exam"))?
            .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;
        if exam.results_released_at.is_none() {
            return Err(ApiError::Forbidden("Results are not released yet".to_string()));
        }
    }

    if copy.status != CopyStatus::Graded {
        return Err(ApiError::NotFound("Copy has no final PDF".to_string()));
    }
    let key = copy
        .final_pdf
        .ok_or_else(|| ApiError::NotFound("Copy has no final PDF".to_string()))?;

    let storage_service = state
        .storage()
        .ok_or_else(|| ApiError::Internal("Storage is not configured".to_string()))?;
    let url = storage_service
        .presign_get(&key, std::time::Duration::from_secs(FINAL_PDF_URL_TTL_SECONDS))
        .await
        .map_err(|e| ApiError::internal(e, "Failed to presign final PDF"))?;

    Ok(Redirect::temporary(&url))
}

// Drafts

async fn put_draft(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<DraftPut>,
) -> Result<Json<DraftResponse>, ApiError> {
    require_mutable(&state, &copy_id, &user.id, &headers).await?;

    let now = primitive_now_utc();
    repositories::drafts::upsert(state.db(), &copy_id, &user.id, payload.payload, now)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to save draft"))?;

    let draft = repositories::drafts::find(state.db(), &copy_id, &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load draft"))?
        .ok_or_else(|| ApiError::Internal("Draft disappeared after save".to_string()))?;

    Ok(Json(DraftResponse::from(&draft)))
}

async fn get_draft(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
) -> Result<Json<DraftResponse>, ApiError> {
    let draft = repositories::drafts::find(state.db(), &copy_id, &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load draft"))?
        .ok_or_else(|| ApiError::NotFound("No draft for this copy".to_string()))?;

    Ok(Json(DraftResponse::from(&draft)))
}

async fn delete_draft(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_mutable(&state, &copy_id, &user.id, &headers).await?;

    repositories::drafts::delete(state.db(), &copy_id, &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete draft"))?;

    Ok(StatusCode::NO_CONTENT)
}

// Audit trail

#[derive(Debug, Default, Deserialize)]
struct EventQuery {
    #[serde(default)]
    limit: Option<i64>,
}

async fn list_events(
    State(state): State<AppState>,
    CurrentTeacher(_user): CurrentTeacher,
    Path(copy_id): Path<String>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    fetch_copy(&state, &copy_id).await?;

    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT).clamp(1, MAX_EVENT_LIMIT);
    let events = repositories::events::list_for_copy(state.db(), &copy_id, limit)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list events"))?;

    Ok(Json(events.iter().map(EventResponse::from).collect()))
}

// Lifecycle

async fn validate_copy(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
) -> Result<Json<CopySummaryResponse>, ApiError> {
    let copy = lifecycle::validate_copy(&state, &copy_id, &user.id).await?;
    Ok(Json(CopySummaryResponse::from(&copy)))
}

async fn quarantine_copy(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
    payload: Option<Json<QuarantineRequest>>,
) -> Result<Json<CopySummaryResponse>, ApiError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let copy =
        lifecycle::quarantine_copy(&state, &copy_id, &user.id, request.reason.as_deref()).await?;
    Ok(Json(CopySummaryResponse::from(&copy)))
}

async fn release_from_quarantine(
    State(state): State<AppState>,
    CurrentAdmin(user): CurrentAdmin,
    Path(copy_id): Path<String>,
) -> Result<Json<CopySummaryResponse>, ApiError> {
    let copy = lifecycle::release_from_quarantine(&state, &copy_id, &user.id).await?;
    Ok(Json(CopySummaryResponse::from(&copy)))
}

async fn reset_to_staging(
    State(state): State<AppState>,
    CurrentAdmin(user): CurrentAdmin,
    Path(copy_id): Path<String>,
) -> Result<Json<CopySummaryResponse>, ApiError> {
    let copy = lifecycle::reset_to_staging(&state, &copy_id, &user.id).await?;
    Ok(Json(CopySummaryResponse::from(&copy)))
}

// Task polling

pub(crate) async fn get_task(
    State(state): State<AppState>,
    CurrentTeacher(_user): CurrentTeacher,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = repositories::tasks::find_by_id(state.db(), &task_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load task"))?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    Ok(Json(TaskResponse::from(&task)))
}

// Helpers

async fn fetch_copy(state: &AppState, copy_id: &str) -> Result<Copy, ApiError> {
    repositories::copies::find_by_id(state.db(), copy_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load copy"))?
        .ok_or_else(|| ApiError::NotFound("Copy not found".to_string()))
}

/// Lock-protected mutations require the copy to be LOCKED and the caller to
/// hold a live lease whose token matches the X-Lock-Token header.
async fn require_mutable(
    state: &AppState,
    copy_id: &str,
    user_id: &str,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    let token = guards::require_lock_token(headers)?;
    let copy = fetch_copy(state, copy_id).await?;
    if copy.status != CopyStatus::Locked {
        return Err(ApiError::Conflict("Copy is not locked for grading".to_string()));
    }
    locks::verify_mutation_gate(state, copy_id, user_id, token).await?;
    Ok(())
}

async fn append_grade_event(
    state: &AppState,
    copy_id: &str,
    actor_id: &str,
    metadata: serde_json::Value,
) -> Result<(), ApiError> {
    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to record grading event"))?;
    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id,
            actor_id: Some(actor_id),
            action: GradingAction::Grade,
            metadata,
            created_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to record grading event"))?;
    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to record grading event"))?;
    Ok(())
}
