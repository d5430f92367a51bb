mod config;
mod worker;

use anyhow::Result;
use clap::Parser;
use grid_protocol::{shutdown, NetworkMode, Registry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grid-worker", about = "Grid evolution worker")]
struct Cli {
    /// Session to serve
    #[arg(long, default_value = "default", env = "GRID_SESSION")]
    session: String,

    /// Relay address for LAN mode (host:port)
    #[arg(long, default_value = "127.0.0.1:7435", env = "GRID_SERVER")]
    server: String,

    /// LAN (relay connection) or WAN (mailbox polling)
    #[arg(long, default_value = "LAN", env = "GRID_MODE")]
    mode: NetworkMode,

    /// Mailbox API URL for WAN mode (e.g. https://your-vps:7434)
    #[arg(long, env = "GRID_STORE_URL")]
    store_url: Option<String>,

    /// Shared mailbox directory for WAN mode; wins over --store-url
    #[arg(long, env = "GRID_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Auth token for the mailbox API
    #[arg(long, default_value = "", env = "GRID_TOKEN")]
    token: String,

    /// Worker name (e.g. paul-rtx5070); loops get -0, -1, ... appended
    #[arg(long, env = "GRID_WORKER_NAME")]
    name: Option<String>,

    /// Number of worker loops in this process
    #[arg(long, default_value = "1")]
    workers: usize,

    /// Scratch directory (result backups)
    #[arg(long, default_value = "./worker-data")]
    work_dir: PathBuf,

    /// Poll interval in seconds
    #[arg(long, default_value = "1")]
    poll_interval: u64,

    /// Seconds before a reconnect attempt
    #[arg(long, default_value = "10")]
    reconnect_delay: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let name = cli
        .name
        .unwrap_or_else(|| format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
    let cfg = Arc::new(config::Config {
        session: cli.session,
        mode: cli.mode,
        relay_addr: cli.server,
        store_url: cli.store_url,
        store_dir: cli.store_dir,
        auth_token: cli.token,
        worker_name: name,
        workers: cli.workers.max(1),
        work_dir: cli.work_dir,
        poll_interval_secs: cli.poll_interval,
        receive_timeout_secs: 30,
        reconnect_delay_secs: cli.reconnect_delay,
    });

    tracing::info!(
        worker = %cfg.worker_name,
        session = %cfg.session,
        mode = %cfg.mode,
        loops = cfg.workers,
        "Starting grid worker"
    );

    let registry = Arc::new(Registry::with_defaults());
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let handles = worker::spawn_workers(cfg.clone(), registry, shutdown_rx);
    let mut handled = 0;
    let mut failed = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(stats)) => handled += stats.handled,
            Ok(Err(e)) => {
                failed += 1;
                tracing::error!("Worker loop failed: {e:#}");
            }
            Err(e) => {
                failed += 1;
                tracing::error!("Worker task panicked: {e}");
            }
        }
    }

    tracing::info!(handled = handled, failed_loops = failed, "Worker shut down");
    if failed == cfg.workers {
        anyhow::bail!("every worker loop failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async { signal::ctrl_c().await.ok(); };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
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
