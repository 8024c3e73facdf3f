use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tidepool_server::{
    serve, telemetry::Telemetry, AppState, Cli, ServerConfig, SessionManager,
};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let config = ServerConfig::try_from(Cli::parse())?;
    info!(
        listen_addr = %config.listen_addr,
        workspace_dir = %config.sessions.workspace_dir.display(),
        shell = %config.sessions.shell,
        scrollback_bytes = config.sessions.scrollback_bytes,
        "starting tidepool-server"
    );

    let sessions = SessionManager::new(config.sessions.clone());
    let state = Arc::new(AppState::new(sessions, Some(telemetry.metrics_handle())));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("tidepool-server listening on {}", config.listen_addr);

    serve(listener, state, &config, shutdown_signal()).await
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
