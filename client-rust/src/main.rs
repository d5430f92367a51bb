use anyhow::{Context, Result};
use clap::Parser;
use grid_protocol::{
    build_mediator, shutdown, GridConfig, NetworkMode, NodeConfig, Orchestrator, OrchestratorOptions, PeerRole,
    Registry, RunOutcome, TransportSettings,
};
use std::path::PathBuf;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grid-client", about = "Grid evolution orchestrator")]
struct Cli {
    /// Registered configuration to run (sphere, sphere-population, sphere-local, ping)
    #[arg(long, default_value = "sphere", env = "GRID_CONFIG")]
    config: String,

    /// JSON configuration file; registered under its own name and run instead of --config
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// LAN (relay connection) or WAN (mailbox polling)
    #[arg(long, default_value = "LAN", env = "GRID_MODE")]
    mode: NetworkMode,

    /// Collect results of an earlier run instead of sending new work
    #[arg(long)]
    receive_only: bool,

    #[arg(long, default_value = "default", env = "GRID_SESSION")]
    session: String,

    /// Relay address for LAN mode (host:port)
    #[arg(long, default_value = "127.0.0.1:7435", env = "GRID_SERVER")]
    server: String,

    /// Mailbox API URL for WAN mode
    #[arg(long, env = "GRID_STORE_URL")]
    store_url: Option<String>,

    /// Shared mailbox directory for WAN mode; wins over --store-url
    #[arg(long, env = "GRID_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[arg(long, default_value = "", env = "GRID_TOKEN")]
    token: String,

    /// Keep a JSON copy of every merged result here
    #[arg(long, env = "GRID_BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    #[arg(long)]
    max_cycles: Option<u64>,

    #[arg(long)]
    fan_out: Option<usize>,

    #[arg(long)]
    fitness_threshold: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,
}

/// Resolve and validate the configuration. Runs before any network activity.
fn grid_config(cli: &Cli, registry: &mut Registry) -> Result<GridConfig> {
    let mut node = match &cli.config_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading configuration {}", path.display()))?;
            let node: NodeConfig = serde_json::from_str(&text)
                .with_context(|| format!("parsing configuration {}", path.display()))?;
            registry.register_config(node.clone());
            node
        }
        None => registry.node_config(&cli.config)?,
    };

    if let Some(max_cycles) = cli.max_cycles {
        node.params.max_cycles = max_cycles;
    }
    if let Some(fan_out) = cli.fan_out {
        node.params.fan_out = fan_out;
    }
    if cli.fitness_threshold.is_some() {
        node.params.fitness_threshold = cli.fitness_threshold;
    }
    if cli.seed.is_some() {
        node.params.seed = cli.seed;
    }

    registry
        .build_node(&node)
        .with_context(|| format!("configuration `{}` is invalid", node.name))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut registry = Registry::with_defaults();
    let config = grid_config(&cli, &mut registry)?;

    tracing::info!(
        config = %config.name(),
        session = %cli.session,
        mode = %cli.mode,
        fan_out = config.params().fan_out,
        max_cycles = config.params().max_cycles,
        "Starting grid client"
    );

    let mediator = build_mediator(&TransportSettings {
        mode: cli.mode,
        relay_addr: cli.server.clone(),
        store_url: cli.store_url.clone(),
        store_dir: cli.store_dir.clone(),
        token: cli.token.clone(),
        role: PeerRole::Client,
        session: cli.session.clone(),
        name: format!("client-{}", std::process::id()),
        backup_dir: cli.backup_dir.clone(),
    })
    .context("building transport")?;

    let options = OrchestratorOptions::for_mode(cli.mode, &cli.session).receive_only(cli.receive_only);
    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT, stopping after the current step");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = Orchestrator::new(config, mediator, options)?.run(shutdown_rx).await?;

    match report.outcome {
        RunOutcome::Finished => tracing::info!(cycles = report.cycles, merged = report.results_merged, "Run finished"),
        RunOutcome::Interrupted => tracing::warn!(cycles = report.cycles, "Run interrupted"),
    }
    if let Some(best) = &report.best {
        println!("{}", serde_json::to_string_pretty(best)?);
    }
    Ok(())
}
