mod models;
mod relay;
mod routes;
mod state;
mod storage;

use anyhow::{Context, Result};
use clap::Parser;
use grid_protocol::shutdown;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grid-server", about = "Grid evolution relay (LAN) and mailbox store (WAN)")]
struct Cli {
    /// TCP port of the LAN relay
    #[arg(long, default_value = "7435", env = "GRID_RELAY_PORT")]
    relay_port: u16,

    /// HTTP port of the WAN mailbox API
    #[arg(long, default_value = "7434", env = "GRID_HTTP_PORT")]
    http_port: u16,

    /// Auth token (required for all HTTP endpoints)
    #[arg(long, env = "GRID_TOKEN")]
    token: String,

    /// Data directory for mailbox persistence
    #[arg(long, default_value = "./server-data", env = "GRID_DATA_DIR")]
    data_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    tracing::info!(
        relay_port = cli.relay_port,
        http_port = cli.http_port,
        data_dir = %cli.data_dir,
        "Starting grid server"
    );

    let relay = relay::Relay::new();
    let state = state::AppState::new(cli.token, cli.data_dir, relay.clone());

    match storage::load_state(&state).await {
        Ok(pending) => tracing::info!(pending = pending, "Mailboxes restored"),
        Err(e) => tracing::warn!("Failed to load persisted mailboxes: {e:#}"),
    }

    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let relay_addr = format!("0.0.0.0:{}", cli.relay_port);
    let relay_listener = tokio::net::TcpListener::bind(&relay_addr)
        .await
        .with_context(|| format!("binding relay on {relay_addr}"))?;
    tracing::info!("Relay listening on {relay_addr}");
    let relay_task = tokio::spawn(relay.serve(relay_listener, shutdown_rx.clone()));

    let app = routes::create_router(state.clone()).layer(CorsLayer::permissive());
    let http_addr = format!("0.0.0.0:{}", cli.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding mailbox API on {http_addr}"))?;
    tracing::info!("Mailbox API listening on {http_addr}");

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut http_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown::cancelled(&mut http_shutdown).await })
        .await?;

    if let Err(e) = relay_task.await {
        tracing::warn!("Relay task ended abnormally: {e}");
    }
    storage::save_state(&state).await.context("saving mailboxes on shutdown")?;
    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok(); };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
