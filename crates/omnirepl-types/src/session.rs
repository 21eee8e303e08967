//! Session, history and environment types plus the registry's request/response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::language::Language;

/// Kind of a terminal history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Input,
    Output,
    Error,
}

/// One line of a session's terminal transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    pub content: String,
    /// Stored verbatim; clients send either RFC 3339 datetimes or free-form strings.
    pub timestamp: String,
}

impl HistoryEntry {
    pub fn new(id: impl Into<String>, kind: HistoryKind, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }
}

/// Serialized interpreter state of one session.
///
/// The registry never looks inside `serialized_data`; only the backend for
/// `language` produces and consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub language: Language,
    #[serde(default)]
    pub serialized_data: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// A named, language-tagged unit of execution continuity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    /// Immutable once the session exists.
    pub language: Language,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub environment: Option<EnvironmentState>,
}

impl Session {
    pub fn new(id: impl Into<String>, name: impl Into<String>, language: Language) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            language,
            created_at: now,
            last_accessed: now,
            execution_count: 0,
            history: Vec::new(),
            environment: None,
        }
    }

    /// Name given to sessions created without one, `"Session {N+1}"`.
    pub fn default_name(existing_sessions: u64) -> String {
        format!("Session {}", existing_sessions + 1)
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameSessionRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityQuery {
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddHistoryEntryRequest {
    pub entry: HistoryEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateHistoryEntryRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEnvironmentRequest {
    pub language: Language,
    #[serde(default)]
    pub serialized_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<Session>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    pub message: String,
    pub session_id: String,
    /// `None` when no backend is configured for the session's language.
    pub cleanup_successful: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameSessionResponse {
    pub message: String,
    pub session_id: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryEntry>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryAppendedResponse {
    pub message: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryUpdatedResponse {
    pub message: String,
    pub entry_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentResponse {
    pub environment: Option<EnvironmentState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Plain acknowledgement body, `{message, session_id?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
        }
    }

    pub fn for_session(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: Some(session_id.into()),
        }
    }
}

/// Most recent history entry as shown in the admin listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPreview {
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentDetails {
    pub language: Language,
    pub data: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub data_size: usize,
}

/// Extended per-session view returned by `GET /admin/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSession {
    pub id: String,
    pub name: String,
    pub language: Language,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub execution_count: u64,
    pub history_count: usize,
    pub last_history_entry: Option<HistoryPreview>,
    pub has_environment: bool,
    pub environment_language: Option<Language>,
    pub environment_updated: Option<DateTime<Utc>>,
    pub full_history: Vec<HistoryEntry>,
    pub environment_details: Option<EnvironmentDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSummary {
    pub total_sessions: usize,
    pub by_language: BTreeMap<Language, usize>,
    pub active_sessions: usize,
    pub total_executions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSessionList {
    pub sessions: Vec<AdminSession>,
    pub total: usize,
    pub summary: AdminSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryHealth {
    pub status: String,
    pub service: String,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
