//! Events emitted by `POST /execute-stream/{session_id}`.

use serde::{Deserialize, Serialize};

/// One event of a streaming execution.
///
/// A stream carries any number of `Output`/`Error` events followed by exactly
/// one `Complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Text written to the primary output stream.
    Output { content: String },
    /// Text written to the error stream, or a failure diagnostic.
    Error { content: String },
    /// Terminal event; `0` on success and `1` on failure.
    Complete {
        #[serde(rename = "returnCode")]
        return_code: i32,
    },
}

impl StreamEvent {
    pub fn output(content: impl Into<String>) -> Self {
        Self::Output {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    pub fn complete(return_code: i32) -> Self {
        Self::Complete { return_code }
    }

    /// SSE event name, identical to the `type` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Output { .. } => "output",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Complete { .. } => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            StreamEvent::Output { content } | StreamEvent::Error { content } => Some(content),
            StreamEvent::Complete { .. } => None,
        }
    }
}
