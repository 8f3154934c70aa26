use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::dispatch::DispatchError;
use crate::services::identify::IdentifyError;
use crate::services::import::ImportError;
use crate::services::lifecycle::LifecycleError;
use crate::services::locks::LockError;

/// Wire shape for every error the service emits. `detail` is the only key.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    TooManyRequests(&'static str),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<LockError> for ApiError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::NotFound => ApiError::NotFound("Copy not found".to_string()),
            LockError::BadTtl(message) => ApiError::BadRequest(message),
            LockError::WrongStatus(message) | LockError::Conflict(message) => {
                ApiError::Conflict(message)
            }
            LockError::Forbidden(message) => ApiError::Forbidden(message),
            LockError::RateLimited => ApiError::TooManyRequests("Too many lock requests"),
            LockError::Db(db_err) => ApiError::internal(db_err, "Lock operation failed"),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound => ApiError::NotFound("Copy not found".to_string()),
            LifecycleError::BadTransition(message) | LifecycleError::Validation(message) => {
                ApiError::BadRequest(message)
            }
            LifecycleError::Lock(lock_err) => lock_err.into(),
            LifecycleError::Processing(message) => {
                ApiError::internal(message, "Copy processing failed")
            }
            LifecycleError::Db(db_err) => ApiError::internal(db_err, "Copy operation failed"),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::ExamNotFound => ApiError::NotFound("Exam not found".to_string()),
            DispatchError::NoCorrectors => {
                ApiError::BadRequest("Exam has no correctors to dispatch to".to_string())
            }
            DispatchError::Db(db_err) => ApiError::internal(db_err, "Dispatch failed"),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::ExamNotFound => ApiError::NotFound("Exam not found".to_string()),
            ImportError::Validation(message) => ApiError::BadRequest(message),
            ImportError::Storage(message) => ApiError::internal(message, "Upload storage failed"),
            ImportError::Db(db_err) => ApiError::internal(db_err, "Import failed"),
        }
    }
}

impl From<IdentifyError> for ApiError {
    fn from(err: IdentifyError) -> Self {
        match err {
            IdentifyError::CopyNotFound => ApiError::NotFound("Copy not found".to_string()),
            IdentifyError::StudentNotFound => ApiError::NotFound("Student not found".to_string()),
            IdentifyError::Db(db_err) => ApiError::internal(db_err, "Identification failed"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Unauthorized(message) => {
                let mut response = (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse { detail: message.to_string() }),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                return response;
            }
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::TooManyRequests(message) => {
                (StatusCode::TOO_MANY_REQUESTS, message.to_string())
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn error_body_carries_only_detail() {
        let response = ApiError::Conflict("copy is locked".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(object["detail"], "copy is locked");
    }

    #[test]
    fn lock_status_violations_map_to_conflict() {
        let err = LockError::WrongStatus("Copy is not in a lockable state".to_string());
        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));
    }
}
