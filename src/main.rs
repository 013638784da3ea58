use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quotaguard::config::ServiceConfig;
use quotaguard::ratelimit::RateLimiter;
use quotaguard::web::HttpServer;

/// Demo HTTP service with every route behind the rate limiter.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "QUOTAGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting quotaguard");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ServiceConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        distributed = config.rate_limiting.redis_url.is_some(),
        "Configuration loaded"
    );

    let rate_limiter = Arc::new(RateLimiter::connect(config.rate_limiting).await?);
    info!("Rate limiter initialized");

    let server = HttpServer::new(config.server.listen_addr, app(), rate_limiter);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("quotaguard stopped");
    Ok(())
}

fn app() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello!" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": true }))
}

/// Resolve once the process is asked to stop.
///
/// A handler that cannot be installed is logged and never fires, so the
/// server keeps running on the remaining signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    info!(signal = received, "quotaguard shutting down, draining in-flight requests");
}
