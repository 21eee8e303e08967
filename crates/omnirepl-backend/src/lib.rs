//! Execution backends
//!
//! A backend serves exactly one guest language. It keeps nothing between
//! requests: every execution pulls the session's state from the registry,
//! runs the code, pushes the new state back and reports the activity.
//!
//! Two kinds of executor plug into the same [`Backend`]:
//!
//! - the in-process `kite` interpreter, whose globals travel through the
//!   registry as an encoded snapshot;
//! - subprocess executors (`bash`, `perl`, `python`, `ruby`, `php`, `node`)
//!   that keep a working directory per session on local disk.

pub mod error;
pub mod executors;
pub mod registry_client;
pub mod routes;
pub mod service;

pub use error::{BackendError, Result};
pub use executors::{executor_for, Executor, Invocation, RunReport};
pub use registry_client::{HttpRegistryClient, RegistryClient};
pub use routes::AppState;
pub use service::Backend;

use axum::Router;
use omnirepl_http::{apply_layers, serve_with_shutdown, shutdown_signal, ServerConfig};
use omnirepl_types::Language;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Session ids are logged by their first eight characters.
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub language: Language,
    pub registry_url: String,
    /// Parent of the per-session working directories.
    pub session_root: PathBuf,
    pub execution_timeout: Duration,
    pub server: ServerConfig,
}

impl BackendConfig {
    pub fn new(language: Language, registry_url: impl Into<String>) -> Self {
        Self {
            language,
            registry_url: registry_url.into(),
            session_root: PathBuf::from("/tmp/omnirepl_sessions"),
            execution_timeout: Duration::from_secs(30),
            server: ServerConfig::default(),
        }
    }

    pub fn with_session_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.session_root = root.into();
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }
}

/// Build the backend router around `backend`.
pub fn build_router(backend: Backend, server: &ServerConfig) -> Router {
    let state = AppState::new(backend, server.sse_keepalive_interval);
    apply_layers(routes::router(state), server)
}

pub struct BackendServer {
    config: BackendConfig,
}

impl BackendServer {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let BackendConfig {
            language,
            registry_url,
            session_root,
            execution_timeout,
            server,
        } = self.config;

        let executor = executor_for(&language, &session_root)?;
        let registry = Arc::new(HttpRegistryClient::new(registry_url.clone()));
        let backend = Backend::new(executor, registry).with_timeout(execution_timeout);

        log::info!("Starting {} backend", language);
        log::info!("Session registry: {}", registry_url);
        log::info!("Execution timeout: {:?}", execution_timeout);

        serve_with_shutdown(build_router(backend, &server), &server, shutdown_signal())
            .await
            .map_err(|e| BackendError::internal(e.to_string()))
    }
}
