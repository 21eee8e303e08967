//! HTTP plumbing shared by the session registry and the language backends
//!
//! Both services are axum routers wrapped in the same middleware stack: request
//! logging, tracing, and a CORS policy that is permissive in development and
//! restricted to an explicit origin list in production.

pub mod error;
pub mod sse;

pub use error::{error_response, HttpError, Result};
pub use sse::{create_sse_response, SseEvent, SseStream};

use axum::{middleware, Router};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Deployment mode, read from `ENVIRONMENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentMode {
    #[default]
    Development,
    Production,
}

impl FromStr for DeploymentMode {
    type Err = HttpError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(HttpError::config_error(format!(
                "Unknown environment '{}', expected development or production",
                other
            ))),
        }
    }
}

/// Which origins may call the service from a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    /// Any origin, any method, any header.
    Permissive,
    /// Only the listed origins.
    Origins(Vec<String>),
}

impl CorsPolicy {
    /// Development allows everything; production is limited to `origins`.
    pub fn for_mode(mode: DeploymentMode, origins: &str) -> Self {
        match mode {
            DeploymentMode::Development => Self::Permissive,
            DeploymentMode::Production => Self::Origins(
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }

    fn layer(&self) -> CorsLayer {
        match self {
            CorsPolicy::Permissive => CorsLayer::permissive(),
            CorsPolicy::Origins(origins) => {
                let parsed: std::result::Result<Vec<axum::http::HeaderValue>, _> =
                    origins.iter().map(|origin| origin.parse()).collect();
                match parsed {
                    Ok(origins) => CorsLayer::new()
                        .allow_origin(origins)
                        .allow_methods(Any)
                        .allow_headers(Any),
                    Err(e) => {
                        log::warn!(
                            "Invalid CORS origin in {:?}: {}; denying cross-origin requests",
                            origins,
                            e
                        );
                        CorsLayer::new()
                    }
                }
            }
        }
    }
}

/// Configuration common to both services.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Cross-origin policy
    pub cors: CorsPolicy,
    /// Enable request logging
    pub enable_logging: bool,
    /// SSE keep-alive interval
    pub sse_keepalive_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            cors: CorsPolicy::Permissive,
            enable_logging: true,
            sse_keepalive_interval: Duration::from_secs(15),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_cors(mut self, cors: CorsPolicy) -> Self {
        self.cors = cors;
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }

    pub fn with_sse_keepalive(mut self, interval: Duration) -> Self {
        self.sse_keepalive_interval = interval;
        self
    }
}

/// Wrap `router` in the logging, tracing and CORS layers configured by `config`.
pub fn apply_layers(router: Router, config: &ServerConfig) -> Router {
    let mut router = router;

    if config.enable_logging {
        router = router.layer(middleware::from_fn(
            |request: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| async move {
                let request_id = uuid::Uuid::new_v4().to_string();
                let method = request.method().clone();
                let uri = request.uri().clone();

                // Health probes are frequent; keep them out of the info log.
                if uri.path() == "/health" {
                    log::debug!("Request {} {} {}", request_id, method, uri);
                } else {
                    log::info!("Request {} {} {}", request_id, method, uri);
                }

                let start = std::time::Instant::now();
                let response = next.run(request).await;
                let duration = start.elapsed();

                if uri.path() == "/health" {
                    log::debug!("Response {} completed in {:?}", request_id, duration);
                } else {
                    log::info!(
                        "Response {} {} completed in {:?}",
                        request_id,
                        response.status(),
                        duration
                    );
                }

                response
            },
        ));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(config.cors.layer())
}

/// Bind `config.bind_addr` and serve `router` until `shutdown` resolves.
pub async fn serve_with_shutdown<F>(router: Router, config: &ServerConfig, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
        HttpError::config_error(format!("Failed to bind to {}: {}", config.bind_addr, e))
    })?;

    log::info!("Listening on {}", config.bind_addr);
    log::info!("Health check: http://{}/health", config.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| HttpError::internal(format!("Server error: {}", e)))?;

    log::info!("Server on {} shut down gracefully", config.bind_addr);
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    #[test]
    fn test_cors_policy_for_mode() {
        assert_eq!(
            CorsPolicy::for_mode(DeploymentMode::Development, "http://a.test"),
            CorsPolicy::Permissive
        );
        assert_eq!(
            CorsPolicy::for_mode(DeploymentMode::Production, "http://a.test, http://b.test,"),
            CorsPolicy::Origins(vec!["http://a.test".to_string(), "http://b.test".to_string()])
        );
    }

    #[test]
    fn test_deployment_mode_parse() {
        assert_eq!("Production".parse::<DeploymentMode>().unwrap(), DeploymentMode::Production);
        assert_eq!("dev".parse::<DeploymentMode>().unwrap(), DeploymentMode::Development);
        assert!("staging".parse::<DeploymentMode>().is_err());
    }

    #[tokio::test]
    async fn test_production_cors_rejects_unknown_origin() {
        let config = ServerConfig::new().with_cors(CorsPolicy::for_mode(
            DeploymentMode::Production,
            "http://allowed.test",
        ));
        let app = apply_layers(Router::new().route("/ping", get(|| async { "pong" })), &config);

        let allowed = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header("origin", "http://allowed.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
        assert_eq!(
            allowed.headers().get("access-control-allow-origin").unwrap(),
            "http://allowed.test"
        );

        let denied = app
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header("origin", "http://evil.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(denied.headers().get("access-control-allow-origin").is_none());
    }
}
