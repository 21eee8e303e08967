//! Best-effort isolation reset on a session's backend.

use async_trait::async_trait;
use omnirepl_types::Language;
use std::time::Duration;

use crate::directory::BackendDirectory;

/// Asks a backend to discard everything it holds for a session.
#[async_trait]
pub trait BackendResetter: Send + Sync {
    /// `None` when no backend is configured for `language`, otherwise whether
    /// the backend acknowledged the reset. Never fails the caller.
    async fn reset(&self, language: &Language, session_id: &str) -> Option<bool>;
}

/// Calls `POST {backend}/reset/{session_id}`.
pub struct HttpBackendResetter {
    directory: BackendDirectory,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpBackendResetter {
    pub fn new(directory: BackendDirectory) -> Self {
        Self {
            directory,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl BackendResetter for HttpBackendResetter {
    async fn reset(&self, language: &Language, session_id: &str) -> Option<bool> {
        let base_url = self.directory.resolve(language)?;
        let reset_url = format!("{}/reset/{}", base_url, session_id);

        match self
            .client
            .post(&reset_url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Some(true),
            Ok(response) => {
                log::warn!(
                    "Backend {} refused reset of session {}: {}",
                    language,
                    session_id,
                    response.status()
                );
                Some(false)
            }
            Err(e) => {
                log::warn!(
                    "Failed to cleanup {} backend for session {}: {}",
                    language,
                    session_id,
                    e
                );
                Some(false)
            }
        }
    }
}
