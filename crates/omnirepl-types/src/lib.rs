//! Type definitions shared between the session registry and the execution backends
//!
//! The registry and every per-language backend talk to each other and to clients
//! over JSON. Keeping the wire shapes in one crate means the registry's responses
//! and the backends' parsing of them cannot drift apart.
//!
//! ## Example
//!
//! ```rust
//! use omnirepl_types::{HistoryEntry, HistoryKind, Language};
//!
//! let entry = HistoryEntry::new("e-1", HistoryKind::Input, "set v = 42");
//! assert_eq!(entry.kind, HistoryKind::Input);
//!
//! let language: Language = "Kite".parse().unwrap();
//! assert_eq!(language.as_str(), "kite");
//! ```

pub mod error;
pub mod events;
pub mod execution;
pub mod language;
pub mod session;

pub use error::*;
pub use events::*;
pub use execution::*;
pub use language::*;
pub use session::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_serializes_with_registry_field_names() {
        let session = Session::new("abc", "Session 1", Language::new("kite"));
        let json = serde_json::to_value(&session).unwrap();

        assert_eq!(json["id"], "abc");
        assert_eq!(json["language"], "kite");
        assert_eq!(json["execution_count"], 0);
        assert!(json["history"].as_array().unwrap().is_empty());
        assert!(json["environment"].is_null());
        assert!(json.get("created_at").is_some());
        assert!(json.get("last_accessed").is_some());
    }

    #[test]
    fn test_history_entry_uses_type_field() {
        let entry = HistoryEntry::new("e-1", HistoryKind::Error, "boom");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["content"], "boom");

        let parsed: HistoryEntry = serde_json::from_value(serde_json::json!({
            "id": "e-2",
            "type": "output",
            "content": "42",
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(parsed.kind, HistoryKind::Output);
        assert_eq!(parsed.timestamp, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_stream_event_wire_format() {
        let complete = StreamEvent::complete(0);
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["returnCode"], 0);
        assert!(json.get("content").is_none());

        let output = StreamEvent::output("hello\n");
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["type"], "output");
        assert_eq!(json["content"], "hello\n");
    }
}
