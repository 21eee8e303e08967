//! Error types for execution backends.
//!
//! Guest failures (a raised error, a non-zero exit, a timeout) are not errors
//! here: they travel inside a successful response. These variants cover the
//! request being unusable or the backend's collaborators failing.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use omnirepl_http::error_response;
use omnirepl_types::Language;
use thiserror::Error;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Error, Debug)]
pub enum BackendError {
    /// Request rejected before any state was touched
    #[error("{0}")]
    Validation(String),

    /// The session belongs to a different language's backend
    #[error("Session {session_id} is configured for {stored}, cannot execute {requested} code")]
    LanguageMismatch {
        session_id: String,
        stored: Language,
        requested: Language,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The registry could not be reached
    #[error("Session registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// The registry answered with an unexpected status or body
    #[error("Session registry error: {0}")]
    Registry(String),

    /// Stored interpreter state could not be read at all
    #[error("Invalid environment snapshot: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BackendError::Validation(_) | BackendError::LanguageMismatch { .. } => StatusCode::BAD_REQUEST,
            BackendError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            BackendError::RegistryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BackendError::Registry(_)
            | BackendError::Snapshot(_)
            | BackendError::Io(_)
            | BackendError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            BackendError::Validation(_) => "validation_error",
            BackendError::LanguageMismatch { .. } => "session_language_mismatch",
            BackendError::SessionNotFound(_) => "not_found",
            BackendError::RegistryUnavailable(_) => "registry_unavailable",
            BackendError::Registry(_) => "registry_error",
            BackendError::Snapshot(_) | BackendError::Io(_) | BackendError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Backend request failed: {}", self);
        }
        error_response(status, self.error_type(), self.to_string())
    }
}
