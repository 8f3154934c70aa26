use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "userrole", rename_all = "lowercase")]
pub(crate) enum UserRole {
    Admin,
    Teacher,
    Student,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "uploadmode", rename_all = "snake_case")]
pub(crate) enum UploadMode {
    #[serde(alias = "BATCH_A3")]
    BatchA3,
    #[serde(alias = "INDIVIDUAL_A4")]
    IndividualA4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "copystatus", rename_all = "lowercase")]
pub(crate) enum CopyStatus {
    Staging,
    Ready,
    Locked,
    Graded,
    Quarantine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "annotationkind", rename_all = "lowercase")]
pub(crate) enum AnnotationKind {
    #[serde(alias = "COMMENTAIRE")]
    Commentaire,
    #[serde(alias = "SURLIGNAGE")]
    Surlignage,
    #[serde(alias = "ERREUR")]
    Erreur,
    #[serde(alias = "BONUS")]
    Bonus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "gradingaction", rename_all = "snake_case")]
pub(crate) enum GradingAction {
    Import,
    Validate,
    Lock,
    Unlock,
    Grade,
    Finalize,
    FinalizeFailed,
    Quarantine,
    Release,
    Reset,
    Dispatch,
    Identified,
    IdentifyRollback,
    UnlockRecovery,
    RasterizeFailed,
    IdentifyFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "ocrmode", rename_all = "snake_case")]
pub(crate) enum OcrMode {
    Auto,
    SemiAuto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "crossvalidation", rename_all = "snake_case")]
pub(crate) enum CrossValidation {
    Consistent,
    Inconsistent,
    SingleSheet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "taskkind", rename_all = "lowercase")]
pub(crate) enum TaskKind {
    Rasterize,
    Identify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "taskstatus", rename_all = "lowercase")]
pub(crate) enum TaskStatus {
    Queued,
    Running,
    Success,
    Error,
}
