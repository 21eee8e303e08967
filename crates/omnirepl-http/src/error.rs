//! Error types for the HTTP layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use omnirepl_types::ErrorBody;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, HttpError>;

/// Errors raised while configuring or running a server.
#[derive(Error, Debug)]
pub enum HttpError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl HttpError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Build the JSON error response both services use for non-2xx outcomes.
pub fn error_response(status: StatusCode, error_type: &str, details: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(error_type, details))).into_response()
}
