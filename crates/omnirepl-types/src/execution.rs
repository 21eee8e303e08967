//! Execution request/response bodies served by the language backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::language::Language;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

impl CodeRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Category of a failed execution reported inside a 200 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorType {
    /// The guest code raised or the process exited non-zero.
    ExecutionError,
    /// The execution bound elapsed and the run was terminated.
    TimeoutError,
}

/// Outcome of `POST /execute/{session_id}`.
///
/// Guest failures are normal traffic: they arrive with HTTP 200 and `error` set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub output: String,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ExecutionErrorType>,
    /// Guest error class, e.g. `ZeroDivisionError` or `ExitStatus`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl ExecuteResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: String,
    pub language: Language,
    pub version: String,
    /// Backends hold no per-session memory between requests.
    pub stateless: bool,
    pub timestamp: DateTime<Utc>,
}
