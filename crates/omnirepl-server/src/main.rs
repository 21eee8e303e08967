//! omnirepl service binary
//!
//! One executable runs either role of the system: the session registry (which
//! also acts as the client-facing gateway) or a single-language execution
//! backend. Every option can also be given through its environment variable,
//! which is how container deployments configure it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use omnirepl_backend::{BackendConfig, BackendServer};
use omnirepl_http::{CorsPolicy, DeploymentMode, ServerConfig};
use omnirepl_registry::{BackendDirectory, RegistryConfig, RegistryServer, SweepConfig};
use omnirepl_types::Language;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(name = "omnirepl", author, version, about = "Session-scoped multi-language code execution")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, global = true, env = "ENVIRONMENT", default_value = "development")]
    environment: String,

    #[clap(
        long,
        global = true,
        env = "CORS_ORIGINS",
        default_value = "http://localhost:8080",
        help = "Comma-separated origins allowed in production"
    )]
    cors_origins: String,

    #[clap(long, global = true, env = "BIND_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    #[clap(long, global = true, env = "BACKEND_PORT", default_value_t = 8000)]
    port: u16,

    #[clap(long, short, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the session registry and gateway
    Registry {
        #[clap(long, env = "DATABASE_URL", default_value = "sqlite://./data/sessions.db")]
        database_url: String,

        #[clap(
            long,
            env = "SESSION_TIMEOUT_SECS",
            default_value_t = 7200,
            help = "Idle time after which a session is swept"
        )]
        session_timeout_secs: u64,

        #[clap(long, env = "CLEANUP_INTERVAL_SECS", default_value_t = 3600)]
        cleanup_interval_secs: u64,
    },
    /// Run the execution backend for one language
    Backend {
        #[clap(long, env = "LANGUAGE", help = "Guest language served: kite, bash, perl, python, ruby, php or node")]
        language: String,

        #[clap(long, env = "SESSION_MANAGER_URL", default_value = "http://session-manager:8000")]
        registry_url: String,

        #[clap(long, env = "SESSION_ROOT", default_value = "/tmp/omnirepl_sessions")]
        session_root: PathBuf,

        #[clap(long, env = "EXECUTION_TIMEOUT_SECS", default_value_t = 30)]
        execution_timeout_secs: u64,
    },
}

impl Cli {
    fn server_config(&self) -> Result<ServerConfig> {
        let mode: DeploymentMode = self
            .environment
            .parse()
            .with_context(|| format!("Invalid ENVIRONMENT '{}'", self.environment))?;
        let cors = CorsPolicy::for_mode(mode, &self.cors_origins);
        log::info!("Environment: {:?}", mode);
        if let CorsPolicy::Origins(origins) = &cors {
            log::info!("Allowed CORS origins: {}", origins.join(", "));
        }

        Ok(ServerConfig::new()
            .with_bind_addr(SocketAddr::new(self.host, self.port))
            .with_cors(cors)
            .with_logging(true))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .parse_default_env()
        .init();

    let server = cli.server_config()?;

    match cli.command {
        Commands::Registry {
            database_url,
            session_timeout_secs,
            cleanup_interval_secs,
        } => {
            let sweep = SweepConfig {
                interval: Duration::from_secs(cleanup_interval_secs.max(1)),
                session_timeout: Duration::from_secs(session_timeout_secs),
            };
            log::info!(
                "Sweeping sessions idle for {:?} every {:?}",
                sweep.session_timeout,
                sweep.interval
            );

            let config = RegistryConfig::new(database_url)
                .with_directory(BackendDirectory::from_env())
                .with_sweep(sweep)
                .with_server(server);
            RegistryServer::new(config)
                .serve()
                .await
                .context("Session registry failed")?;
        }
        Commands::Backend {
            language,
            registry_url,
            session_root,
            execution_timeout_secs,
        } => {
            let language: Language = language
                .parse()
                .with_context(|| format!("Invalid language '{}'", language))?;
            let config = BackendConfig::new(language, registry_url)
                .with_session_root(session_root)
                .with_execution_timeout(Duration::from_secs(execution_timeout_secs.max(1)))
                .with_server(server);
            BackendServer::new(config)
                .serve()
                .await
                .context("Execution backend failed")?;
        }
    }

    log::info!("omnirepl shut down gracefully.");
    Ok(())
}
