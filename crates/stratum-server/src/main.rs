//! Stratum session server
//!
//! This server provides:
//! - Layered session storage (SQLite durable tier, in-process cache tier)
//! - Sessions loaded from a cookie and saved after every request
//! - Periodic purge of expired sessions
//! - `/_ah/health` liveness probe and `/metrics` Prometheus endpoint
//!
//! Usage:
//! ```bash
//! # With config file
//! stratum-server --config config.yaml
//!
//! # Or with environment variables
//! STRATUM_SQLITE_PATH=/var/lib/stratum/sessions.db stratum-server
//! ```
//!
//! Test with:
//! ```bash
//! curl -i -X PUT http://localhost:8080/session/user \
//!   -H "Content-Type: application/json" -d '"alice"'
//! curl -i http://localhost:8080/session -H "Cookie: JSESSIONID=<id>"
//! ```

mod config;
mod middleware;
mod purge;
mod routes;
mod stores;

use anyhow::Context;
use clap::Parser;
use config::ServerConfig;
use middleware::SessionLayer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stratum_core::{Clock, SystemClock};
use stratum_observability::{LivenessState, Metrics};
use stratum_session::SessionManager;
use tokio::net::TcpListener;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Stratum Server - layered HTTP session storage
#[derive(Parser)]
#[command(name = "stratum-server")]
#[command(about = "Session server with write-through durable and cache tiers", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "STRATUM_CONFIG")]
    config: Option<String>,

    /// Address to bind
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration: file, then environment, then command line
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => ServerConfig::default(),
    };
    config.merge_env();

    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_tracing(&config)?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new()?);

    // Session storage
    let tiers = stores::open_tiers(&config.stores).await?;
    let chain = stores::build_chain(&config.stores, &tiers, clock.clone(), metrics.clone())?;
    let manager = Arc::new(
        SessionManager::new(chain, config.session.manager_config())?.with_metrics(metrics.clone()),
    );
    if config.session.timeout_minutes <= 0 {
        info!("Sessions never expire (timeout_minutes <= 0)");
    } else {
        info!(
            "Session timeout: {} minutes",
            config.session.timeout_minutes
        );
    }

    let purge_handle = if config.session.purge_interval_minutes > 0 {
        let interval = Duration::from_secs(config.session.purge_interval_minutes * 60);
        info!("Expired session purge every {:?}", interval);
        Some(purge::spawn_purge_task(
            tiers.clone(),
            clock.clone(),
            interval,
            metrics.clone(),
        ))
    } else {
        warn!("Expired session purge disabled");
        None
    };

    let liveness =
        LivenessState::new(config.health.clone(), clock.clone()).with_metrics(metrics.clone());
    let session_layer = SessionLayer::new(
        manager.clone(),
        &config.session.cookie_name,
        config.session.save_attempts,
    );
    let app = routes::build_app(session_layer, metrics, liveness);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Stratum session server listening on http://{}", addr);
    info!("   Sessions:           http://{}/session", addr);
    info!("   Liveness probe:     http://{}/_ah/health", addr);
    info!("   Prometheus metrics: http://{}/metrics", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(handle) = purge_handle {
        handle.abort();
    }
    tiers.shutdown().await;
    info!("Server stopped");

    Ok(())
}

/// Initialize tracing with configured level and sqlx query control
fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::new(format!("{}", log_level));

    // sqlx logs every statement at INFO; keep it quiet unless asked
    if !config.logging.log_sql_queries {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
