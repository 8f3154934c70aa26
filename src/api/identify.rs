use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentTeacher;
use crate::core::state::AppState;
use crate::db::types::OcrMode;
use crate::repositories;
use crate::schemas::identify::{ChooseStudentRequest, IdentifyStateResponse, OcrResultResponse};
use crate::services::identify;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:copy_id", get(get_ocr_result))
        .route("/:copy_id/choose", post(choose_student))
        .route("/:copy_id/rollback", post(rollback))
}

async fn get_ocr_result(
    State(state): State<AppState>,
    CurrentTeacher(_user): CurrentTeacher,
    Path(copy_id): Path<String>,
) -> Result<Json<OcrResultResponse>, ApiError> {
    let result = repositories::ocr_results::find_by_copy(state.db(), &copy_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load OCR result"))?
        .ok_or_else(|| ApiError::NotFound("No OCR result for this copy".to_string()))?;

    Ok(Json(OcrResultResponse::from(&result)))
}

async fn choose_student(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
    Json(payload): Json<ChooseStudentRequest>,
) -> Result<Json<IdentifyStateResponse>, ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    identify::choose_student(&state, &copy_id, &payload.student_id, &user.id).await?;

    identify_state(&state, copy_id).await
}

async fn rollback(
    State(state): State<AppState>,
    CurrentTeacher(user): CurrentTeacher,
    Path(copy_id): Path<String>,
) -> Result<Json<IdentifyStateResponse>, ApiError> {
    identify::rollback_identification(&state, &copy_id, &user.id).await?;

    identify_state(&state, copy_id).await
}

async fn identify_state(
    state: &AppState,
    copy_id: String,
) -> Result<Json<IdentifyStateResponse>, ApiError> {
    let copy = repositories::copies::find_by_id(state.db(), &copy_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load copy"))?
        .ok_or_else(|| ApiError::NotFound("Copy not found".to_string()))?;
    let ocr_mode = repositories::ocr_results::find_by_copy(state.db(), &copy_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load OCR result"))?
        .map(|result| result.ocr_mode)
        .unwrap_or(OcrMode::Manual);

    Ok(Json(IdentifyStateResponse {
        copy_id,
        student_id: copy.student_id,
        is_identified: copy.is_identified,
        ocr_mode,
    }))
}
