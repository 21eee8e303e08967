//! Session registry
//!
//! The registry owns every session's metadata, terminal history and serialized
//! interpreter state. Execution backends hold nothing between requests: they
//! pull a session's state from here before running code and push it back
//! afterwards. The registry also resolves which backend serves a language and
//! forwards client execution requests there.
//!
//! ```no_run
//! use omnirepl_registry::{BackendDirectory, RegistryConfig, RegistryServer};
//!
//! # async fn run() -> omnirepl_registry::Result<()> {
//! let config = RegistryConfig::new("sqlite://./data/sessions.db")
//!     .with_directory(BackendDirectory::from_env());
//! RegistryServer::new(config).serve().await
//! # }
//! ```

pub mod directory;
pub mod error;
pub mod gateway;
pub mod reset;
pub mod routes;
pub mod service;
pub mod store;
pub mod sweep;

pub use directory::{BackendDirectory, SHIPPED_LANGUAGES};
pub use error::{RegistryError, Result};
pub use gateway::{ExecuteMode, Gateway};
pub use reset::{BackendResetter, HttpBackendResetter};
pub use routes::AppState;
pub use service::SessionRegistry;
pub use store::{ActivityOutcome, SessionStore};
pub use sweep::{ExpirySweeper, SweepConfig};

use axum::Router;
use omnirepl_http::{apply_layers, serve_with_shutdown, shutdown_signal, ServerConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything needed to run the registry service.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub database_url: String,
    pub directory: BackendDirectory,
    pub sweep: SweepConfig,
    pub server: ServerConfig,
}

impl RegistryConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            directory: BackendDirectory::new(),
            sweep: SweepConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn with_directory(mut self, directory: BackendDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_sweep(mut self, sweep: SweepConfig) -> Self {
        self.sweep = sweep;
        self
    }

    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }
}

/// Build the registry router over an existing store.
pub fn build_router(store: SessionStore, directory: BackendDirectory, server: &ServerConfig) -> Router {
    let resetter = Arc::new(HttpBackendResetter::new(directory.clone()));
    let registry = SessionRegistry::new(store, resetter);
    let gateway = Gateway::new(registry.clone(), directory);
    apply_layers(routes::router(AppState::new(registry, gateway)), server)
}

pub struct RegistryServer {
    config: RegistryConfig,
}

impl RegistryServer {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }

    /// Open the store, start the expiry sweep and serve until Ctrl+C or SIGTERM.
    pub async fn serve(self) -> Result<()> {
        let RegistryConfig {
            database_url,
            directory,
            sweep,
            server,
        } = self.config;

        let store = SessionStore::connect(&database_url).await?;
        log::info!("Session store ready at {}", database_url);
        for language in directory.languages() {
            log::info!(
                "Backend for {}: {}",
                language,
                directory.resolve(language).unwrap_or("-")
            );
        }

        let resetter = Arc::new(HttpBackendResetter::new(directory.clone()));
        let registry = SessionRegistry::new(store, resetter);
        let gateway = Gateway::new(registry.clone(), directory);

        let shutdown = CancellationToken::new();
        let sweeper = ExpirySweeper::new(registry.clone(), sweep).spawn(shutdown.clone());

        let app = apply_layers(routes::router(AppState::new(registry, gateway)), &server);
        let result = serve_with_shutdown(app, &server, shutdown_signal())
            .await
            .map_err(|e| RegistryError::internal(e.to_string()));

        shutdown.cancel();
        if let Err(e) = sweeper.await {
            log::warn!("Session sweep task ended abnormally: {}", e);
        }
        result
    }
}
