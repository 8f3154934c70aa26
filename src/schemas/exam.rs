use serde::{Deserialize, Serialize};
use time::Date;
use validator::Validate;

pub(crate) use crate::core::time::format_primitive;
use crate::db::models::{Copy, Exam};
use crate::db::types::{CopyStatus, UploadMode};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamCreate {
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub(crate) name: String,
    pub(crate) exam_date: Date,
    pub(crate) upload_mode: UploadMode,
    #[serde(default)]
    pub(crate) grading_structure: Option<serde_json::Value>,
    #[serde(default)]
    #[validate(range(exclusive_min = 0.0, message = "total_points must be positive"))]
    pub(crate) total_points: Option<f64>,
    #[serde(default)]
    pub(crate) correctors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamResponse {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) exam_date: Date,
    pub(crate) upload_mode: UploadMode,
    pub(crate) grading_structure: Option<serde_json::Value>,
    pub(crate) total_points: Option<f64>,
    pub(crate) results_released_at: Option<String>,
    pub(crate) created_by: String,
    pub(crate) created_at: String,
    pub(crate) correctors: Vec<String>,
}

impl ExamResponse {
    pub(crate) fn from_exam(exam: &Exam, correctors: Vec<String>) -> Self {
        Self {
            id: exam.id.clone(),
            name: exam.name.clone(),
            exam_date: exam.exam_date,
            upload_mode: exam.upload_mode,
            grading_structure: exam.grading_structure.as_ref().map(|json| json.0.clone()),
            total_points: exam.total_points,
            results_released_at: exam.results_released_at.map(format_primitive),
            created_by: exam.created_by.clone(),
            created_at: format_primitive(exam.created_at),
            correctors,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CopySummaryResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) anonymous_id: String,
    pub(crate) status: CopyStatus,
    pub(crate) is_identified: bool,
    pub(crate) assigned_corrector: Option<String>,
    pub(crate) locked_by: Option<String>,
    pub(crate) graded_at: Option<String>,
}

impl From<&Copy> for CopySummaryResponse {
    fn from(copy: &Copy) -> Self {
        Self {
            id: copy.id.clone(),
            exam_id: copy.exam_id.clone(),
            anonymous_id: copy.anonymous_id.clone(),
            status: copy.status,
            is_identified: copy.is_identified,
            assigned_corrector: copy.assigned_corrector.clone(),
            locked_by: copy.locked_by.clone(),
            graded_at: copy.graded_at.map(format_primitive),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ImportResponse {
    pub(crate) copy_id: String,
    pub(crate) anonymous_id: String,
    pub(crate) booklet_ids: Vec<String>,
    pub(crate) rasterize_task_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct DispatchAssignment {
    pub(crate) copy_id: String,
    pub(crate) corrector_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct DispatchResponse {
    pub(crate) dispatch_run_id: String,
    pub(crate) assignments: Vec<DispatchAssignment>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReleaseResponse {
    pub(crate) exam_id: String,
    pub(crate) results_released_at: String,
}
