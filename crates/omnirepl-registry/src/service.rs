//! Session registry operations.

use chrono::{DateTime, Utc};
use omnirepl_types::{
    AdminSession, AdminSessionList, AdminSummary, CreateSessionRequest, DeleteSessionResponse,
    EnvironmentDetails, EnvironmentResponse, EnvironmentState, HistoryAppendedResponse,
    HistoryEntry, HistoryPreview, HistoryResponse, HistoryUpdatedResponse, Language,
    MessageResponse, RegistryHealth, RenameSessionResponse, Session, SessionList,
    UpdateEnvironmentRequest,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RegistryError, Result};
use crate::reset::BackendResetter;
use crate::store::{ActivityOutcome, SessionStore};

const PREVIEW_CHARS: usize = 100;

/// Shortened session id for log lines.
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// The authoritative owner of session metadata, history and environment state.
#[derive(Clone)]
pub struct SessionRegistry {
    store: SessionStore,
    resetter: Arc<dyn BackendResetter>,
}

impl SessionRegistry {
    pub fn new(store: SessionStore, resetter: Arc<dyn BackendResetter>) -> Self {
        Self { store, resetter }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub async fn create(&self, request: CreateSessionRequest) -> Result<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let name = request.name.filter(|name| !name.trim().is_empty());
        let session = self.store.create(&id, name, request.language).await?;
        log::info!(
            "Created session {} ({}) for {}",
            short_id(&session.id),
            session.name,
            session.language
        );
        Ok(session)
    }

    /// Fetch a session, refreshing its last access time.
    pub async fn get(&self, id: &str) -> Result<Session> {
        self.store
            .touch(id)
            .await?
            .ok_or_else(|| RegistryError::not_found(id))
    }

    /// Reset the session on its backend, then remove it.
    pub async fn delete(&self, id: &str) -> Result<DeleteSessionResponse> {
        let session = self
            .store
            .fetch(id)
            .await?
            .ok_or_else(|| RegistryError::not_found(id))?;

        let cleanup_successful = self.resetter.reset(&session.language, id).await;
        self.store.delete(id).await?;
        log::info!(
            "Deleted session {} (backend cleanup: {:?})",
            short_id(id),
            cleanup_successful
        );

        Ok(DeleteSessionResponse {
            message: "Session deleted successfully".to_string(),
            session_id: id.to_string(),
            cleanup_successful,
        })
    }

    pub async fn rename(&self, id: &str, name: String) -> Result<RenameSessionResponse> {
        if name.trim().is_empty() {
            return Err(RegistryError::invalid_request("Session name must not be empty"));
        }

        let new_name = name.clone();
        self.store
            .update_with(id, move |session| {
                session.name = name;
                Ok(())
            })
            .await?;

        Ok(RenameSessionResponse {
            message: "Session renamed successfully".to_string(),
            session_id: id.to_string(),
            new_name,
        })
    }

    /// Count one execution. Unknown sessions are created on the spot with a
    /// default name and a count of zero.
    pub async fn record_activity(&self, id: &str, language: &Language) -> Result<MessageResponse> {
        match self.store.record_activity(id, language).await? {
            ActivityOutcome::Created => {
                log::info!("Auto-created session {} for {}", short_id(id), language)
            }
            ActivityOutcome::Recorded => {
                log::debug!("Recorded activity on session {}", short_id(id))
            }
        }
        Ok(MessageResponse::new("Session activity updated"))
    }

    pub async fn append_history(&self, id: &str, entry: HistoryEntry) -> Result<HistoryAppendedResponse> {
        let entry_count = self
            .store
            .update_with(id, move |session| {
                session.history.push(entry);
                Ok(session.history.len())
            })
            .await?;

        log::debug!(
            "Saved {} history entries for session {}",
            entry_count,
            short_id(id)
        );
        Ok(HistoryAppendedResponse {
            message: "History entry added".to_string(),
            entry_count,
        })
    }

    /// Replace the content of one history entry; every other field is kept.
    pub async fn update_history_entry(
        &self,
        id: &str,
        entry_id: &str,
        content: String,
    ) -> Result<HistoryUpdatedResponse> {
        self.store
            .update_with(id, |session| {
                let entry = session
                    .history
                    .iter_mut()
                    .find(|entry| entry.id == entry_id)
                    .ok_or_else(|| RegistryError::EntryNotFound {
                        session_id: id.to_string(),
                        entry_id: entry_id.to_string(),
                    })?;
                entry.content = content;
                Ok(())
            })
            .await?;

        Ok(HistoryUpdatedResponse {
            message: "History entry updated".to_string(),
            entry_id: entry_id.to_string(),
        })
    }

    pub async fn get_history(&self, id: &str) -> Result<HistoryResponse> {
        let session = self.get(id).await?;
        let count = session.history.len();
        Ok(HistoryResponse {
            history: session.history,
            count,
        })
    }

    pub async fn clear_history(&self, id: &str) -> Result<MessageResponse> {
        self.store
            .update_with(id, |session| {
                session.history.clear();
                Ok(())
            })
            .await?;
        Ok(MessageResponse::for_session("History cleared", id))
    }

    pub async fn get_environment(&self, id: &str) -> Result<EnvironmentResponse> {
        let session = self.get(id).await?;
        Ok(match session.environment {
            Some(environment) => EnvironmentResponse {
                environment: Some(environment),
                message: None,
            },
            None => EnvironmentResponse {
                environment: None,
                message: Some("No environment state stored".to_string()),
            },
        })
    }

    /// Overwrite the stored environment wholesale.
    pub async fn put_environment(
        &self,
        id: &str,
        request: UpdateEnvironmentRequest,
    ) -> Result<MessageResponse> {
        self.store
            .update_with(id, move |session| {
                session.environment = request.serialized_data.map(|data| EnvironmentState {
                    language: request.language,
                    serialized_data: Some(data),
                    last_updated: Utc::now(),
                });
                Ok(())
            })
            .await?;
        Ok(MessageResponse::for_session("Environment state updated", id))
    }

    pub async fn clear_environment(&self, id: &str) -> Result<MessageResponse> {
        self.store
            .update_with(id, |session| {
                session.environment = None;
                Ok(())
            })
            .await?;
        Ok(MessageResponse::for_session("Environment state cleared", id))
    }

    pub async fn list(&self) -> Result<SessionList> {
        let sessions = self.store.fetch_all().await?;
        let total = sessions.len();
        Ok(SessionList { sessions, total })
    }

    /// Every session with full history and environment, most recently used first.
    pub async fn admin_list(&self) -> Result<AdminSessionList> {
        let mut sessions: Vec<AdminSession> = self
            .store
            .fetch_all()
            .await?
            .into_iter()
            .map(admin_view)
            .collect();
        sessions.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));

        let mut by_language: BTreeMap<Language, usize> = BTreeMap::new();
        for session in &sessions {
            *by_language.entry(session.language.clone()).or_default() += 1;
        }

        let summary = AdminSummary {
            total_sessions: sessions.len(),
            by_language,
            active_sessions: sessions.iter().filter(|s| s.execution_count > 0).count(),
            total_executions: sessions.iter().map(|s| s.execution_count).sum(),
        };

        Ok(AdminSessionList {
            total: sessions.len(),
            sessions,
            summary,
        })
    }

    pub async fn health(&self) -> RegistryHealth {
        match self.store.ping().await {
            Ok(()) => RegistryHealth {
                status: "healthy".to_string(),
                service: "session-manager".to_string(),
                database: "connected".to_string(),
                error: None,
            },
            Err(e) => {
                log::error!("Registry health check failed: {}", e);
                RegistryHealth {
                    status: "unhealthy".to_string(),
                    service: "session-manager".to_string(),
                    database: "disconnected".to_string(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Delete every session last accessed before `cutoff` and reset it on its
    /// backend. Returns the number of sessions removed.
    pub async fn expire_idle(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let candidates = self.store.select_idle(cutoff).await?;
        let mut removed = 0;

        for (id, language) in candidates {
            // Re-checked at delete time; activity since selection keeps the session.
            if !self.store.delete_if_idle(&id, cutoff).await? {
                log::debug!("Session {} was used again, not expiring", short_id(&id));
                continue;
            }
            removed += 1;
            let cleanup = self.resetter.reset(&language, &id).await;
            log::info!(
                "Expired idle session {} (backend cleanup: {:?})",
                short_id(&id),
                cleanup
            );
        }

        Ok(removed)
    }
}

fn admin_view(session: Session) -> AdminSession {
    let last_history_entry = session.history.last().map(|entry| HistoryPreview {
        kind: entry.kind,
        content: preview(&entry.content),
        timestamp: entry.timestamp.clone(),
    });

    let environment_details = session.environment.as_ref().map(|env| EnvironmentDetails {
        language: env.language.clone(),
        data: env.serialized_data.clone(),
        last_updated: env.last_updated,
        data_size: env.serialized_data.as_ref().map_or(0, String::len),
    });

    AdminSession {
        history_count: session.history.len(),
        last_history_entry,
        has_environment: session.environment.is_some(),
        environment_language: session.environment.as_ref().map(|env| env.language.clone()),
        environment_updated: session.environment.as_ref().map(|env| env.last_updated),
        environment_details,
        id: session.id,
        name: session.name,
        language: session.language,
        created_at: session.created_at,
        last_accessed: session.last_accessed,
        execution_count: session.execution_count,
        full_history: session.history,
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let head: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use omnirepl_types::HistoryKind;
    use std::sync::Mutex;

    /// Records reset calls; answers `Some(true)` for every language.
    #[derive(Default)]
    struct RecordingResetter {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl BackendResetter for RecordingResetter {
        async fn reset(&self, language: &Language, session_id: &str) -> Option<bool> {
            self.calls
                .lock()
                .unwrap()
                .push((language.to_string(), session_id.to_string()));
            Some(true)
        }
    }

    async fn registry() -> (SessionRegistry, Arc<RecordingResetter>) {
        let resetter = Arc::new(RecordingResetter::default());
        let store = SessionStore::in_memory().await.unwrap();
        (SessionRegistry::new(store, resetter.clone()), resetter)
    }

    fn create(name: Option<&str>, language: &str) -> CreateSessionRequest {
        CreateSessionRequest {
            name: name.map(str::to_string),
            language: Language::new(language),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (registry, _) = registry().await;
        let session = registry.create(create(None, "kite")).await.unwrap();
        assert_eq!(session.name, "Session 1");
        assert_eq!(session.execution_count, 0);

        let fetched = registry.get(&session.id).await.unwrap();
        assert_eq!(fetched.id, session.id);
        assert!(fetched.last_accessed >= session.last_accessed);

        assert!(matches!(
            registry.get("missing").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_resets_backend() {
        let (registry, resetter) = registry().await;
        let session = registry.create(create(Some("x"), "bash")).await.unwrap();

        let response = registry.delete(&session.id).await.unwrap();
        assert_eq!(response.cleanup_successful, Some(true));
        assert_eq!(
            resetter.calls.lock().unwrap().as_slice(),
            &[("bash".to_string(), session.id.clone())]
        );
        assert!(matches!(
            registry.delete(&session.id).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_activity_enforces_single_language() {
        let (registry, _) = registry().await;
        let kite = Language::new("kite");

        registry.record_activity("s-auto", &kite).await.unwrap();
        let session = registry.get("s-auto").await.unwrap();
        assert_eq!(session.language, "kite");
        assert_eq!(session.execution_count, 0);

        registry.record_activity("s-auto", &kite).await.unwrap();
        registry.record_activity("s-auto", &kite).await.unwrap();
        assert_eq!(registry.get("s-auto").await.unwrap().execution_count, 2);

        let err = registry
            .record_activity("s-auto", &Language::new("bash"))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "session_language_mismatch");
        assert_eq!(registry.get("s-auto").await.unwrap().execution_count, 2);
    }

    #[tokio::test]
    async fn test_history_append_update_clear() {
        let (registry, _) = registry().await;
        let id = registry.create(create(None, "kite")).await.unwrap().id;

        let first = HistoryEntry::new("e1", HistoryKind::Input, "print 1").with_timestamp("t1");
        let second = HistoryEntry::new("e2", HistoryKind::Output, "1");
        assert_eq!(registry.append_history(&id, first).await.unwrap().entry_count, 1);
        assert_eq!(registry.append_history(&id, second).await.unwrap().entry_count, 2);

        registry
            .update_history_entry(&id, "e1", "print 2".to_string())
            .await
            .unwrap();
        let history = registry.get_history(&id).await.unwrap();
        assert_eq!(history.count, 2);
        assert_eq!(history.history[0].content, "print 2");
        assert_eq!(history.history[0].kind, HistoryKind::Input);
        assert_eq!(history.history[0].timestamp, "t1");

        let missing = registry
            .update_history_entry(&id, "nope", "x".to_string())
            .await
            .unwrap_err();
        assert!(matches!(missing, RegistryError::EntryNotFound { .. }));

        registry.clear_history(&id).await.unwrap();
        assert_eq!(registry.get_history(&id).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_environment_overwrite_and_clear() {
        let (registry, _) = registry().await;
        let id = registry.create(create(None, "kite")).await.unwrap().id;

        let empty = registry.get_environment(&id).await.unwrap();
        assert!(empty.environment.is_none());
        assert_eq!(empty.message.as_deref(), Some("No environment state stored"));

        for data in ["first", "second"] {
            registry
                .put_environment(
                    &id,
                    UpdateEnvironmentRequest {
                        language: Language::new("kite"),
                        serialized_data: Some(data.to_string()),
                    },
                )
                .await
                .unwrap();
        }
        let stored = registry.get_environment(&id).await.unwrap().environment.unwrap();
        assert_eq!(stored.serialized_data.as_deref(), Some("second"));
        assert_eq!(stored.language, "kite");

        registry.clear_environment(&id).await.unwrap();
        assert!(registry.get_environment(&id).await.unwrap().environment.is_none());
    }

    #[tokio::test]
    async fn test_admin_list_summary_and_preview() {
        let (registry, _) = registry().await;
        let kite = registry.create(create(Some("k"), "kite")).await.unwrap().id;
        registry.create(create(Some("b"), "bash")).await.unwrap();
        registry.record_activity(&kite, &Language::new("kite")).await.unwrap();

        let long = "x".repeat(150);
        registry
            .append_history(&kite, HistoryEntry::new("e1", HistoryKind::Output, long.clone()))
            .await
            .unwrap();

        let admin = registry.admin_list().await.unwrap();
        assert_eq!(admin.total, 2);
        assert_eq!(admin.summary.total_sessions, 2);
        assert_eq!(admin.summary.active_sessions, 1);
        assert_eq!(admin.summary.total_executions, 1);
        assert_eq!(admin.summary.by_language[&Language::new("bash")], 1);

        // Most recently touched first.
        let first = &admin.sessions[0];
        assert_eq!(first.id, kite);
        let preview = first.last_history_entry.as_ref().unwrap();
        assert_eq!(preview.content.len(), 103);
        assert!(preview.content.ends_with("..."));
        assert_eq!(first.full_history[0].content, long);
    }

    #[tokio::test]
    async fn test_expire_idle_resets_backends() {
        let (registry, resetter) = registry().await;
        let id = registry.create(create(None, "kite")).await.unwrap().id;

        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(registry.expire_idle(past).await.unwrap(), 0);

        let future = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(registry.expire_idle(future).await.unwrap(), 1);
        assert_eq!(resetter.calls.lock().unwrap().len(), 1);
        assert!(registry.get(&id).await.is_err());
    }
}
