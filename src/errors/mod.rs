//! Error handling module for the POS sync service.
//!
//! `AppError` is what the host surface and the local store report; `RemoteError` and
//! `ValidationError` are the engine-internal failures that degrade a cycle instead of
//! escaping it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::models::EntityType;

/// Error codes as constants to avoid stringly-typed errors.
#[allow(dead_code)]
pub mod codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const CONFLICT: &str = "CONFLICT";
    pub const STORAGE_UNAVAILABLE: &str = "STORAGE_UNAVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Record or collection not found
    NotFound(String),
    /// Validation error
    Validation(String),
    /// Write rejected because it would break a cache invariant
    Conflict(String),
    /// Local store unusable; the host must surface this distinctly
    Storage(String),
    /// Internal error, e.g. an unreadable cached payload
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Conflict(_) => codes::CONFLICT,
            AppError::Storage(_) => codes::STORAGE_UNAVAILABLE,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Conflict(msg)
            | AppError::Storage(msg)
            | AppError::Internal(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Storage(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::Internal(format!("JSON error: {}", err))
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &AppError) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorResponse::new(&self))).into_response()
    }
}

/// Failure talking to the remote service. Never retried by the client.
#[derive(Debug)]
pub enum RemoteError {
    /// Connection, TLS or body transport failure
    Transport(String),
    /// Request did not complete in time
    Timeout,
    /// 401/403 from the remote
    Unauthorized { status: u16, message: String },
    /// Any other non-success status
    Api { status: u16, message: String },
    /// Response arrived but is not an authoritative snapshot
    InvalidPayload(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Transport(msg) => write!(f, "transport error: {}", msg),
            RemoteError::Timeout => write!(f, "request timed out"),
            RemoteError::Unauthorized { status, message } => {
                write!(f, "unauthorized ({}): {}", status, message)
            }
            RemoteError::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            RemoteError::InvalidPayload(msg) => write!(f, "invalid payload: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_decode() {
            RemoteError::InvalidPayload(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

/// A raw record that could not be coerced into the canonical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub entity: EntityType,
    pub message: String,
}

impl ValidationError {
    pub fn new(entity: EntityType, message: impl Into<String>) -> Self {
        Self {
            entity,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {} record: {}", self.entity, self.message)
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_maps_to_service_unavailable() {
        let err = AppError::Storage("disk gone".to_string());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_code(), codes::STORAGE_UNAVAILABLE);
        assert_eq!(err.to_string(), "STORAGE_UNAVAILABLE: disk gone");
    }

    #[test]
    fn test_validation_error_converts_to_app_error() {
        let err: AppError = ValidationError::new(EntityType::Customer, "missing id").into();
        assert_eq!(err.error_code(), codes::VALIDATION_ERROR);
        assert_eq!(err.message(), "invalid customer record: missing id");
    }
}
