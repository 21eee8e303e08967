//! Error types for the session registry.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use omnirepl_http::error_response;
use omnirepl_types::Language;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// No session with this id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The session exists but has no history entry with this id
    #[error("History entry not found: {entry_id}")]
    EntryNotFound { session_id: String, entry_id: String },

    /// Activity was reported in a language other than the session's
    #[error("Session {session_id} is configured for {stored}, cannot execute {requested} code")]
    LanguageConflict {
        session_id: String,
        stored: Language,
        requested: Language,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No backend is configured for the session's language
    #[error("No backend configured for language: {0}")]
    NoBackend(Language),

    /// A backend could not be reached while forwarding a request
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn not_found(session_id: impl Into<String>) -> Self {
        Self::NotFound(session_id.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::NotFound(_) | RegistryError::EntryNotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::LanguageConflict { .. }
            | RegistryError::InvalidRequest(_)
            | RegistryError::NoBackend(_) => StatusCode::BAD_REQUEST,
            RegistryError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            RegistryError::Storage(_) | RegistryError::Json(_) | RegistryError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            RegistryError::NotFound(_) | RegistryError::EntryNotFound { .. } => "not_found",
            RegistryError::LanguageConflict { .. } => "session_language_mismatch",
            RegistryError::InvalidRequest(_) | RegistryError::NoBackend(_) => "validation_error",
            RegistryError::BackendUnavailable(_) => "backend_unavailable",
            RegistryError::Storage(_) | RegistryError::Json(_) | RegistryError::Internal(_) => {
                "internal_error"
            }
        }
    }

    /// Detail text sent to clients; storage internals stay in the log.
    fn details(&self) -> String {
        match self {
            RegistryError::NotFound(_) => "Session not found".to_string(),
            RegistryError::EntryNotFound { .. } => "History entry not found".to_string(),
            RegistryError::Storage(_) | RegistryError::Json(_) => "Storage failure".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for RegistryError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for RegistryError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Registry request failed: {}", self);
        }
        error_response(status, self.error_type(), self.details())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RegistryError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        let conflict = RegistryError::LanguageConflict {
            session_id: "s1".to_string(),
            stored: Language::new("kite"),
            requested: Language::new("bash"),
        };
        assert_eq!(conflict.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            conflict.to_string(),
            "Session s1 is configured for kite, cannot execute bash code"
        );
        assert_eq!(
            RegistryError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
