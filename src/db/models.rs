use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::{Date, PrimitiveDateTime};

use crate::db::types::{
    AnnotationKind, CopyStatus, CrossValidation, GradingAction, OcrMode, TaskKind, TaskStatus,
    UploadMode, UserRole,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct User {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) hashed_password: String,
    pub(crate) full_name: String,
    pub(crate) role: UserRole,
    pub(crate) is_active: bool,
    /// For student accounts, the enrollment row this login maps to.
    pub(crate) student_ref: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Student {
    pub(crate) id: String,
    pub(crate) last_name: String,
    pub(crate) first_name: String,
    pub(crate) date_of_birth: Date,
    pub(crate) class_name: String,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) exam_date: Date,
    pub(crate) upload_mode: UploadMode,
    pub(crate) grading_structure: Option<Json<serde_json::Value>>,
    pub(crate) total_points: Option<f64>,
    pub(crate) results_released_at: Option<PrimitiveDateTime>,
    pub(crate) created_by: String,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

/// A contiguous page range within an uploaded PDF. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Booklet {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) start_page: i32,
    pub(crate) end_page: i32,
    pub(crate) pages_images: Json<Vec<String>>,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Copy {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) anonymous_id: String,
    pub(crate) status: CopyStatus,
    pub(crate) student_id: Option<String>,
    pub(crate) is_identified: bool,
    pub(crate) assigned_corrector: Option<String>,
    pub(crate) dispatch_run_id: Option<String>,
    pub(crate) assigned_at: Option<PrimitiveDateTime>,
    pub(crate) locked_by: Option<String>,
    pub(crate) locked_at: Option<PrimitiveDateTime>,
    pub(crate) pdf_source: Option<String>,
    pub(crate) final_pdf: Option<String>,
    pub(crate) global_appreciation: Option<String>,
    pub(crate) llm_summary: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
}

/// Application-level lease over a copy. At most one row per copy; active
/// while `expires_at > now`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct CopyLock {
    pub(crate) copy_id: String,
    pub(crate) owner_id: String,
    pub(crate) token: String,
    pub(crate) acquired_at: PrimitiveDateTime,
    pub(crate) expires_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Annotation {
    pub(crate) id: String,
    pub(crate) copy_id: String,
    pub(crate) page_index: i32,
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) w: f64,
    pub(crate) h: f64,
    pub(crate) kind: AnnotationKind,
    pub(crate) content: String,
    pub(crate) score_delta: Option<i32>,
    pub(crate) created_by: String,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct QuestionScore {
    pub(crate) id: String,
    pub(crate) copy_id: String,
    pub(crate) question_id: String,
    pub(crate) score: f64,
    pub(crate) updated_by: String,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct GradingEvent {
    pub(crate) id: String,
    pub(crate) copy_id: String,
    pub(crate) actor_id: Option<String>,
    pub(crate) action: GradingAction,
    pub(crate) metadata: Json<serde_json::Value>,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct DraftState {
    pub(crate) copy_id: String,
    pub(crate) owner_id: String,
    pub(crate) payload: Json<serde_json::Value>,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct OcrResult {
    pub(crate) copy_id: String,
    pub(crate) header_text: Option<String>,
    pub(crate) confidence: Option<f64>,
    pub(crate) ocr_mode: OcrMode,
    pub(crate) top_candidates: Json<serde_json::Value>,
    pub(crate) chosen_rank: Option<i32>,
    pub(crate) manual_override: bool,
    pub(crate) cross_validation: Option<CrossValidation>,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct BackgroundTask {
    pub(crate) id: String,
    pub(crate) kind: TaskKind,
    pub(crate) copy_id: String,
    pub(crate) status: TaskStatus,
    pub(crate) detail: Option<String>,
    pub(crate) attempts: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) finished_at: Option<PrimitiveDateTime>,
}
