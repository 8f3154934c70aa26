use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentAdmin, CurrentTeacher};
use crate::core::state::AppState;
use crate::core::time::{format_primitive, primitive_now_utc};
use crate::db::models::Exam;
use crate::repositories;
use crate::schemas::exam::{
    CopySummaryResponse, DispatchAssignment, DispatchResponse, ExamCreate, ExamResponse,
    ImportResponse, ReleaseResponse,
};
use crate::services::{dispatch, import};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_exam).get(list_exams))
        .route("/:exam_id", get(get_exam))
        .route("/:exam_id/copies", get(list_copies))
        .route("/:exam_id/copies/import", post(import_copy))
        .route("/:exam_id/dispatch", post(dispatch_exam))
        .route("/:exam_id/release-results", post(release_results))
}

async fn create_exam(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Json(payload): Json<ExamCreate>,
) -> Result<(StatusCode, Json<ExamResponse>), ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let exam = repositories::exams::create(
        state.db(),
        repositories::exams::CreateExam {
            id: &Uuid::new_v4().to_string(),
            name: &payload.name,
            exam_date: payload.exam_date,
            upload_mode: payload.upload_mode,
            grading_structure: payload.grading_structure,
            total_points: payload.total_points,
            created_by: &user.id,
            created_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create exam"))?;

    for corrector_id in &payload.correctors {
        repositories::users::find_by_id(state.db(), corrector_id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to check corrector"))?
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown corrector {corrector_id}")))?;
        repositories::exams::add_corrector(state.db(), &exam.id, corrector_id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to attach corrector"))?;
    }

    let correctors = repositories::exams::list_correctors(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list correctors"))?;

    Ok((StatusCode::CREATED, Json(ExamResponse::from_exam(&exam, correctors))))
}

async fn list_exams(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
) -> Result<Json<Vec<ExamResponse>>, ApiError> {
    let exams = repositories::exams::list_for_teacher(state.db(), &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list exams"))?;

    let mut responses = Vec::with_capacity(exams.len());
    for exam in &exams {
        let correctors = repositories::exams::list_correctors(state.db(), &exam.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to list correctors"))?;
        responses.push(ExamResponse::from_exam(exam, correctors));
    }

    Ok(Json(responses))
}

async fn get_exam(
    State(state): State<AppState>,
    CurrentTeacher(_user): CurrentTeacher,
    Path(exam_id): Path<String>,
) -> Result<Json<ExamResponse>, ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    let correctors = repositories::exams::list_correctors(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list correctors"))?;

    Ok(Json(ExamResponse::from_exam(&exam, correctors)))
}

/// Multipart upload of a scanned PDF. One copy per request; batch scans are
/// cut into booklets according to the exam's upload mode.
async fn import_copy(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(exam_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImportResponse>), ApiError> {
    let mut pdf_bytes: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("Invalid multipart body: {err}")))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|err| ApiError::BadRequest(format!("Failed to read upload: {err}")))?;
            pdf_bytes = Some(data.to_vec());
        }
    }
    let pdf_bytes =
        pdf_bytes.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".to_string()))?;

    let outcome = import::import_pdf(&state, &exam_id, &user.id, pdf_bytes).await?;

    // Rasterization runs on the worker; the caller polls the returned task.
    Ok((
        StatusCode::CREATED,
        Json(ImportResponse {
            copy_id: outcome.copy.id,
            anonymous_id: outcome.copy.anonymous_id,
            booklet_ids: outcome.booklet_ids,
            rasterize_task_id: outcome.rasterize_task_id,
        }),
    ))
}

/// Copies of an exam. Quarantined copies stay hidden from the listing.
async fn list_copies(
    State(state): State<AppState>,
    CurrentTeacher(_user): CurrentTeacher,
    Path(exam_id): Path<String>,
) -> Result<Json<Vec<CopySummaryResponse>>, ApiError> {
    fetch_exam(&state, &exam_id).await?;

    let copies = repositories::copies::list_for_exam_visible(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list copies"))?;

    Ok(Json(copies.iter().map(CopySummaryResponse::from).collect()))
}

/// Dispatch reassigns correctors across the whole exam, so it is reserved to
/// admins.
async fn dispatch_exam(
    State(state): State<AppState>,
    CurrentAdmin(user): CurrentAdmin,
    Path(exam_id): Path<String>,
) -> Result<Json<DispatchResponse>, ApiError> {
    let outcome = dispatch::dispatch_exam(&state, &exam_id, &user.id).await?;

    Ok(Json(DispatchResponse {
        dispatch_run_id: outcome.dispatch_run_id,
        assignments: outcome
            .assignments
            .into_iter()
            .map(|(copy_id, corrector_id)| DispatchAssignment { copy_id, corrector_id })
            .collect(),
    }))
}

/// Releasing results is one-shot; a second call is a conflict.
async fn release_results(
    State(state): State<AppState>,
    CurrentTeacher(_user): CurrentTeacher,
    Path(exam_id): Path<String>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    fetch_exam(&state, &exam_id).await?;

    let now = primitive_now_utc();
    let released = repositories::exams::release_results(state.db(), &exam_id, now)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to release results"))?;
    if !released {
        return Err(ApiError::Conflict("Results are already released".to_string()));
    }

    Ok(Json(ReleaseResponse { exam_id, results_released_at: format_primitive(now) }))
}

async fn fetch_exam(state: &AppState, exam_id: &str) -> Result<Exam, ApiError> {
    repositories::exams::find_by_id(state.db(), exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))
}
