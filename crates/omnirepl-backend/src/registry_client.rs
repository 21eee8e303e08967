//! The backend's view of the session registry.

use async_trait::async_trait;
use omnirepl_types::{EnvironmentResponse, EnvironmentState, Language, Session, UpdateEnvironmentRequest};
use reqwest::StatusCode;
use std::time::Duration;

use crate::error::{BackendError, Result};

/// Calls a backend makes on the registry around each execution.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// `None` when the registry has no such session.
    async fn fetch_session(&self, session_id: &str) -> Result<Option<Session>>;

    async fn fetch_environment(&self, session_id: &str) -> Result<Option<EnvironmentState>>;

    /// Overwrite the session's serialized state.
    async fn store_environment(&self, session_id: &str, language: &Language, data: String) -> Result<()>;

    /// Returns `false` if the registry does not know the session.
    async fn clear_environment(&self, session_id: &str) -> Result<bool>;

    async fn record_activity(&self, session_id: &str, language: &Language) -> Result<()>;
}

/// HTTP client for the registry service.
pub struct HttpRegistryClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn session_url(&self, session_id: &str, suffix: &str) -> String {
        format!("{}/sessions/{}{}", self.base_url, session_id, suffix)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BackendError::RegistryUnavailable(e.to_string()))
    }
}

fn unexpected(action: &str, status: StatusCode) -> BackendError {
    BackendError::registry(format!("{} returned {}", action, status))
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn fetch_session(&self, session_id: &str) -> Result<Option<Session>> {
        let response = self.send(self.client.get(self.session_url(session_id, ""))).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let session = response
                    .json::<Session>()
                    .await
                    .map_err(|e| BackendError::registry(format!("Invalid session body: {}", e)))?;
                Ok(Some(session))
            }
            status => Err(unexpected("Session lookup", status)),
        }
    }

    async fn fetch_environment(&self, session_id: &str) -> Result<Option<EnvironmentState>> {
        let response = self
            .send(self.client.get(self.session_url(session_id, "/environment")))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(BackendError::SessionNotFound(session_id.to_string())),
            status if status.is_success() => {
                let body = response
                    .json::<EnvironmentResponse>()
                    .await
                    .map_err(|e| BackendError::registry(format!("Invalid environment body: {}", e)))?;
                Ok(body.environment)
            }
            status => Err(unexpected("Environment lookup", status)),
        }
    }

    async fn store_environment(&self, session_id: &str, language: &Language, data: String) -> Result<()> {
        let body = UpdateEnvironmentRequest {
            language: language.clone(),
            serialized_data: Some(data),
        };
        let response = self
            .send(
                self.client
                    .put(self.session_url(session_id, "/environment"))
                    .json(&body),
            )
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(BackendError::SessionNotFound(session_id.to_string())),
            status if status.is_success() => Ok(()),
            status => Err(unexpected("Environment update", status)),
        }
    }

    async fn clear_environment(&self, session_id: &str) -> Result<bool> {
        let response = self
            .send(self.client.delete(self.session_url(session_id, "/environment")))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(unexpected("Environment reset", status)),
        }
    }

    async fn record_activity(&self, session_id: &str, language: &Language) -> Result<()> {
        let response = self
            .send(
                self.client
                    .put(self.session_url(session_id, "/activity"))
                    .query(&[("language", language.as_str())]),
            )
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::BAD_REQUEST => {
                let stored = self
                    .fetch_session(session_id)
                    .await?
                    .map(|session| session.language)
                    .unwrap_or_default();
                Err(BackendError::LanguageMismatch {
                    session_id: session_id.to_string(),
                    stored,
                    requested: language.clone(),
                })
            }
            status => Err(unexpected("Activity update", status)),
        }
    }
}
