//! Error handling for FloorEye

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict (duplicate)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage is not configured for this process
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Detector endpoint is not configured
    #[error("Detector unavailable: {0}")]
    DetectorUnavailable(String),

    /// Detector call failed (transport, timeout, non-2xx)
    #[error("Detector error: {0}")]
    Detector(String),

    /// Frame capture failed (stream unreachable, empty frame)
    #[error("Capture error: {0}")]
    Capture(String),

    /// Notification transport failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl Error {
    /// HTTP status and stable error code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Error::StorageUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
            }
            Error::DetectorUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "DETECTOR_UNAVAILABLE")
            }
            Error::Detector(_) => (StatusCode::BAD_GATEWAY, "DETECTOR_ERROR"),
            Error::Capture(_) => (StatusCode::BAD_GATEWAY, "CAPTURE_ERROR"),
            Error::Notification(_) => (StatusCode::BAD_GATEWAY, "NOTIFICATION_ERROR"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Error::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR")
            }
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Sqlx(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let message = match &self {
            Error::NotFound(msg)
            | Error::Validation(msg)
            | Error::Conflict(msg)
            | Error::StorageUnavailable(msg)
            | Error::DetectorUnavailable(msg)
            | Error::Detector(msg)
            | Error::Capture(msg)
            | Error::Notification(msg)
            | Error::Config(msg)
            | Error::Internal(msg) => msg.clone(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        } else {
            tracing::debug!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
