use serde::{Deserialize, Serialize};
use validator::Validate;

pub(crate) use crate::core::time::format_primitive;
use crate::db::models::{Annotation, BackgroundTask, DraftState, GradingEvent, QuestionScore};
use crate::db::types::{AnnotationKind, CopyStatus, GradingAction, TaskKind, TaskStatus};

/// `ttl_seconds` is kept raw so a non-integer body yields a 400 instead of a
/// deserialization rejection.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct LockRequest {
    #[serde(default)]
    pub(crate) ttl_seconds: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LockResponse {
    pub(crate) copy_id: String,
    pub(crate) token: String,
    pub(crate) expires_at: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct HeartbeatResponse {
    pub(crate) copy_id: String,
    pub(crate) expires_at: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnnotationCreate {
    #[validate(range(min = 0, message = "page_index must be non-negative"))]
    pub(crate) page_index: i32,
    #[validate(range(min = 0.0, max = 1.0, message = "x must be within [0, 1]"))]
    pub(crate) x: f64,
    #[validate(range(min = 0.0, max = 1.0, message = "y must be within [0, 1]"))]
    pub(crate) y: f64,
    #[validate(range(min = 0.0, max = 1.0, message = "w must be within [0, 1]"))]
    pub(crate) w: f64,
    #[validate(range(min = 0.0, max = 1.0, message = "h must be within [0, 1]"))]
    pub(crate) h: f64,
    #[serde(alias = "type")]
    pub(crate) kind: AnnotationKind,
    #[serde(default)]
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) score_delta: Option<i32>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub(crate) struct AnnotationUpdate {
    #[serde(default)]
    #[validate(range(min = 0, message = "page_index must be non-negative"))]
    pub(crate) page_index: Option<i32>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0, message = "x must be within [0, 1]"))]
    pub(crate) x: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0, message = "y must be within [0, 1]"))]
    pub(crate) y: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0, message = "w must be within [0, 1]"))]
    pub(crate) w: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0, message = "h must be within [0, 1]"))]
    pub(crate) h: Option<f64>,
    #[serde(default, alias = "type")]
    pub(crate) kind: Option<AnnotationKind>,
    #[serde(default)]
    pub(crate) content: Option<String>,
    #[serde(default, with = "double_option")]
    pub(crate) score_delta: Option<Option<i32>>,
}

/// Distinguishes an absent `score_delta` from an explicit null.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<i32>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<i32>::deserialize(deserializer).map(Some)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnnotationResponse {
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
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<&Annotation> for AnnotationResponse {
    fn from(annotation: &Annotation) -> Self {
        Self {
            id: annotation.id.clone(),
            copy_id: annotation.copy_id.clone(),
            page_index: annotation.page_index,
            x: annotation.x,
            y: annotation.y,
            w: annotation.w,
            h: annotation.h,
            kind: annotation.kind,
            content: annotation.content.clone(),
            score_delta: annotation.score_delta,
            created_by: annotation.created_by.clone(),
            created_at: format_primitive(annotation.created_at),
            updated_at: format_primitive(annotation.updated_at),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ScoreUpsert {
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    pub(crate) score: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScoreResponse {
    pub(crate) question_id: String,
    pub(crate) score: f64,
    pub(crate) updated_by: String,
    pub(crate) updated_at: String,
}

impl From<&QuestionScore> for ScoreResponse {
    fn from(score: &QuestionScore) -> Self {
        Self {
            question_id: score.question_id.clone(),
            score: score.score,
            updated_by: score.updated_by.clone(),
            updated_at: format_primitive(score.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ScoreListResponse {
    pub(crate) copy_id: String,
    pub(crate) scores: Vec<ScoreResponse>,
    pub(crate) total: f64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FinalizeRequest {
    #[serde(default)]
    pub(crate) global_appreciation: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FinalizeResponse {
    pub(crate) copy_id: String,
    pub(crate) status: CopyStatus,
    pub(crate) final_pdf: String,
    pub(crate) score: f64,
    pub(crate) graded_at: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DraftPut {
    pub(crate) payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct DraftResponse {
    pub(crate) copy_id: String,
    pub(crate) owner_id: String,
    pub(crate) payload: serde_json::Value,
    pub(crate) updated_at: String,
}

impl From<&DraftState> for DraftResponse {
    fn from(draft: &DraftState) -> Self {
        Self {
            copy_id: draft.copy_id.clone(),
            owner_id: draft.owner_id.clone(),
            payload: draft.payload.0.clone(),
            updated_at: format_primitive(draft.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct EventResponse {
    pub(crate) id: String,
    pub(crate) copy_id: String,
    pub(crate) actor_id: Option<String>,
    pub(crate) action: GradingAction,
    pub(crate) metadata: serde_json::Value,
    pub(crate) created_at: String,
}

impl From<&GradingEvent> for EventResponse {
    fn from(event: &GradingEvent) -> Self {
        Self {
            id: event.id.clone(),
            copy_id: event.copy_id.clone(),
            actor_id: event.actor_id.clone(),
            action: event.action,
            metadata: event.metadata.0.clone(),
            created_at: format_primitive(event.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TaskResponse {
    pub(crate) id: String,
    pub(crate) kind: TaskKind,
    pub(crate) copy_id: String,
    pub(crate) status: TaskStatus,
    pub(crate) detail: Option<String>,
    pub(crate) attempts: i32,
    pub(crate) created_at: String,
    pub(crate) started_at: Option<String>,
    pub(crate) finished_at: Option<String>,
}

impl From<&BackgroundTask> for TaskResponse {
    fn from(task: &BackgroundTask) -> Self {
        Self {
            id: task.id.clone(),
            kind: task.kind,
            copy_id: task.copy_id.clone(),
            status: task.status,
            detail: task.detail.clone(),
            attempts: task.attempts,
            created_at: format_primitive(task.created_at),
            started_at: task.started_at.map(format_primitive),
            finished_at: task.finished_at.map(format_primitive),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct QuarantineRequest {
    #[serde(default)]
    pub(crate) reason: Option<String>,
}
