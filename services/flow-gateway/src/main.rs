//! Flow Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads session credentials from `<data_dir>/at` and keeps them fresh
//! 2. Watches that directory for credentials added or removed at runtime
//! 3. Serves image and video generation over HTTP, optionally streamed as SSE
//! 4. Serves credential management on a separate admin listener

mod admin;
mod config;
mod generate;
mod metrics;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use flow_client::{CredentialDir, FlowClient};
use flow_generation::Orchestrator;
use flow_pool::Pool;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::generate::build_generate_router;

/// Maximum time to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state for the health and metrics handlers
#[derive(Clone)]
struct AppState {
    pool: Arc<Pool>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the main router: health, metrics and the generation API.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, orchestrator: Arc<Orchestrator>, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(build_generate_router(orchestrator))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting flow-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_listen_addr = %config.server.admin_listen_addr,
        data_dir = %config.pool.data_dir.display(),
        watch = config.pool.watch,
        proxy = config.upstream.proxy.is_some(),
        "configuration loaded"
    );

    let client = FlowClient::new(config.client_config()).context("failed to build HTTP client")?;
    let credential_dir = config.credential_dir();
    let store = CredentialDir::open(&credential_dir)
        .await
        .with_context(|| format!("failed to open credential directory {}", credential_dir.display()))?;

    let pool = Arc::new(Pool::new(store, Arc::new(client)));
    pool.load().await.context("failed to load credentials")?;
    pool.start_refresh_worker(config.refresh_interval());
    if config.pool.watch {
        pool.start_file_watch()
            .context("failed to watch credential directory")?;
    }

    let orchestrator = Arc::new(Orchestrator::new(pool.clone(), config.orchestrator_config()));

    let app_state = AppState {
        pool: pool.clone(),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(app_state, orchestrator, config.server.max_connections);
    let admin_app = build_admin_router(AdminState::new(pool.clone()));

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.server.admin_listen_addr)
        .await
        .with_context(|| format!("failed to bind admin listener to {}", config.server.admin_listen_addr))?;

    info!(
        addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_listen_addr,
        credentials = pool.count().await,
        "accepting requests"
    );

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: both servers are told to drain, then raced against it.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut main_rx = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = main_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    let mut admin_rx = shutdown_rx;
    let admin_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(async move {
                let _ = admin_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    let drained = async {
        let (main, admin) = tokio::join!(server_handle, admin_handle);
        for (name, outcome) in [("main", main), ("admin", admin)] {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(listener = name, error = %e, "server error during shutdown"),
                Err(e) => error!(listener = name, error = %e, "server task panicked"),
            }
        }
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, drained).await {
        Ok(()) => info!("all in-flight requests drained"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    pool.stop().await;

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: pool counts and uptime.
/// Returns 200 when at least one credential is ready, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.pool.stats().await;
    let uptime = state.started_at.elapsed().as_secs();

    let (status_code, status) = if stats.ready > 0 {
        (axum::http::StatusCode::OK, "healthy")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": status,
            "credentials_total": stats.total,
            "credentials_ready": stats.ready,
            "credentials_disabled": stats.disabled,
            "credentials_errored": stats.errored,
            "uptime_seconds": uptime,
        })
        .to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
