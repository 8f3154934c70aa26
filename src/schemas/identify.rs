use serde::{Deserialize, Serialize};
use validator::Validate;

pub(crate) use crate::core::time::format_primitive;
use crate::db::models::OcrResult;
use crate::db::types::{CrossValidation, OcrMode};

#[derive(Debug, Serialize)]
pub(crate) struct OcrResultResponse {
    pub(crate) copy_id: String,
    pub(crate) header_text: Option<String>,
    pub(crate) confidence: Option<f64>,
    pub(crate) ocr_mode: OcrMode,
    pub(crate) top_candidates: serde_json::Value,
    pub(crate) chosen_rank: Option<i32>,
    pub(crate) manual_override: bool,
    pub(crate) cross_validation: Option<CrossValidation>,
    pub(crate) updated_at: String,
}

impl From<&OcrResult> for OcrResultResponse {
    fn from(result: &OcrResult) -> Self {
        Self {
            copy_id: result.copy_id.clone(),
            header_text: result.header_text.clone(),
            confidence: result.confidence,
            ocr_mode: result.ocr_mode,
            top_candidates: result.top_candidates.0.clone(),
            chosen_rank: result.chosen_rank,
            manual_override: result.manual_override,
            cross_validation: result.cross_validation,
            updated_at: format_primitive(result.updated_at),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ChooseStudentRequest {
    #[validate(length(min = 1, message = "student_id must not be empty"))]
    pub(crate) student_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct IdentifyStateResponse {
    pub(crate) copy_id: String,
    pub(crate) student_id: Option<String>,
    pub(crate) is_identified: bool,
    pub(crate) ocr_mode: OcrMode,
}
