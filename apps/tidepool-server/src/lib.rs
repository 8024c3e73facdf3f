//! Backend shim for Tidepool. Spawns shells on pseudo-terminals, keeps a
//! bounded replay buffer per session, and serves the session HTTP API plus
//! the binary-framed terminal stream.

pub mod config;
pub mod error;
pub mod http;
pub mod pty;
pub mod registry;
pub mod scrollback;
pub mod telemetry;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::{Cli, ServerConfig, SessionConfig};
pub use error::ServerError;
pub use registry::SessionManager;

pub struct AppState {
    pub sessions: SessionManager,
    pub metrics: Option<PrometheusHandle>,
    /// Flips to `true` when the server is going away; open streams close
    /// with a shutdown reason.
    pub shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(sessions: SessionManager, metrics: Option<PrometheusHandle>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            sessions,
            metrics,
            shutdown,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(http::health_handler))
        .route("/metrics", get(http::metrics_handler))
        .route("/terminal/create", post(http::create_session))
        .route("/terminal/sessions/:project_id", get(http::list_sessions))
        .route("/terminal/:session_id", delete(http::remove_session))
        .route("/terminal/:session_id/clear", post(http::clear_session))
        .route("/terminal/:session_id/stop", post(http::stop_session))
        .route("/terminal/:session_id/kill", post(http::kill_session))
        .route("/ws/terminal/:session_id", get(ws::stream_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `shutdown` resolves, then closes open streams, gives them
/// the grace period to drain and removes every session.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    config: &ServerConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = build_router(Arc::clone(&state));
    let notify = Arc::clone(&state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutdown signal received");
            notify.shutdown.send_replace(true);
        })
        .await
        .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        sessions = state.sessions.len(),
        "draining before exit"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    state.sessions.shutdown();
    info!("graceful shutdown complete");
    Ok(())
}
