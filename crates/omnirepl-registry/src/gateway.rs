//! Client-facing entry point that routes execution requests to the backend
//! registered for the session's language.

use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use std::time::Duration;

use crate::directory::BackendDirectory;
use crate::error::{RegistryError, Result};
use crate::service::{short_id, SessionRegistry};

/// Which backend endpoint a forwarded request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteMode {
    Buffered,
    Streaming,
}

impl ExecuteMode {
    fn path(self) -> &'static str {
        match self {
            ExecuteMode::Buffered => "execute",
            ExecuteMode::Streaming => "execute-stream",
        }
    }
}

#[derive(Clone)]
pub struct Gateway {
    registry: SessionRegistry,
    directory: BackendDirectory,
    client: reqwest::Client,
    /// Applies to buffered requests only; streams run until the backend closes them.
    timeout: Duration,
}

impl Gateway {
    pub fn new(registry: SessionRegistry, directory: BackendDirectory) -> Self {
        Self {
            registry,
            directory,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn directory(&self) -> &BackendDirectory {
        &self.directory
    }

    /// Resolve the backend URL for a session's stored language.
    pub async fn resolve(&self, session_id: &str) -> Result<String> {
        let session = self
            .registry
            .store()
            .fetch(session_id)
            .await?
            .ok_or_else(|| RegistryError::not_found(session_id))?;

        self.directory
            .resolve(&session.language)
            .map(str::to_string)
            .ok_or(RegistryError::NoBackend(session.language))
    }

    /// Forward `body` to the session's backend and relay its response as-is.
    pub async fn forward(&self, session_id: &str, mode: ExecuteMode, body: Bytes) -> Result<Response> {
        let base_url = self.resolve(session_id).await?;
        let url = format!("{}/{}/{}", base_url, mode.path(), session_id);
        log::debug!("Forwarding session {} to {}", short_id(session_id), url);

        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if mode == ExecuteMode::Buffered {
            request = request.timeout(self.timeout);
        }

        let upstream = request.send().await.map_err(|e| {
            log::warn!("Backend at {} unreachable: {}", base_url, e);
            RegistryError::BackendUnavailable(format!("{}: {}", base_url, e))
        })?;

        let mut response = Response::builder().status(upstream.status());
        if let Some(content_type) = upstream.headers().get(CONTENT_TYPE) {
            response = response.header(CONTENT_TYPE, content_type.clone());
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| RegistryError::internal(format!("Failed to relay backend response: {}", e)))
    }
}
