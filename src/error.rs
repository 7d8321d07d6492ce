use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::ports::RepositoryError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Lost a concurrent write race. Retryable.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Record store or notification collaborator failure. Retryable.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Record store call exceeded its deadline. Retryable.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ResourceExhausted(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Conflict(_) | AppError::Upstream(_) | AppError::Timeout(_)
        )
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::Duplicate(what) => AppError::Conflict(what),
            RepositoryError::Database(msg) => AppError::Upstream(msg),
            RepositoryError::Corrupt(msg) => AppError::Internal(msg),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidArgument(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error_status_code() {
        let error = AppError::NotFound("Redemption not found".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_forbidden_error_status_code() {
        let error = AppError::Forbidden("not the owner".to_string());
        assert_eq!(error.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_invalid_argument_error_status_code() {
        let error = AppError::InvalidArgument("dateFrom after dateTo".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_resource_exhausted_status_code() {
        let error = AppError::ResourceExhausted("export too large".to_string());
        assert_eq!(error.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::Conflict("race".into()).is_retryable());
        assert!(AppError::Timeout("store".into()).is_retryable());
        assert!(AppError::Upstream("db".into()).is_retryable());
        assert!(!AppError::InvalidState("terminal".into()).is_retryable());
        assert!(!AppError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_repository_error_conversion() {
        let err: AppError = RepositoryError::Duplicate("hash".into()).into();
        assert!(matches!(err, AppError::Conflict(_)));
        let err: AppError = RepositoryError::Corrupt("bad status".into()).into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_invalid_state_error_response() {
        let error = AppError::InvalidState("already cancelled".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_timeout_error_response() {
        let error = AppError::Timeout("find_by_id".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
