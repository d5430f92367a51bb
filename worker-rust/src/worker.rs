use anyhow::{Context, Result};
use grid_protocol::shutdown::{cancelled, is_cancelled, ShutdownReceiver};
use grid_protocol::{build_mediator, GridWorker, Mediator, Registry, TransportError, WorkerStats};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Start `cfg.workers` independent loops
pub fn spawn_workers(
    cfg: Arc<Config>,
    registry: Arc<Registry>,
    shutdown: ShutdownReceiver,
) -> Vec<JoinHandle<Result<WorkerStats>>> {
    (0..cfg.workers.max(1))
        .map(|index| {
            let cfg = cfg.clone();
            let registry = registry.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { run_worker(cfg, index, registry, shutdown).await })
        })
        .collect()
}

/// Connect, serve requests until shutdown, reconnect when the relay drops us
pub async fn run_worker(
    cfg: Arc<Config>,
    index: usize,
    registry: Arc<Registry>,
    mut shutdown: ShutdownReceiver,
) -> Result<WorkerStats> {
    let name = cfg.loop_name(index);
    let mediator = build_mediator(&cfg.transport(&name))
        .with_context(|| format!("building {} transport for {name}", cfg.mode))?;
    let worker = Arc::new(GridWorker::new(name.clone(), registry));
    let mut total = WorkerStats::default();

    while connect_with_retry(mediator.as_ref(), &cfg, &name, &mut shutdown).await {
        let outcome = worker
            .clone()
            .run(mediator.clone(), &cfg.session, cfg.poll_options(), shutdown.clone())
            .await;
        match outcome {
            Ok(stats) => {
                total.handled += stats.handled;
                total.empty += stats.empty;
                total.send_failures += stats.send_failures;
                break;
            }
            Err(TransportError::Closed) => {
                tracing::warn!(worker = %name, "Lost the relay, reconnecting");
            }
            Err(e) => {
                mediator.stop().await;
                return Err(e).with_context(|| format!("worker {name} failed"));
            }
        }
    }

    mediator.stop().await;
    Ok(total)
}

/// `false` when shutdown arrived before a connection could be made
async fn connect_with_retry(
    mediator: &dyn Mediator,
    cfg: &Config,
    name: &str,
    shutdown: &mut ShutdownReceiver,
) -> bool {
    loop {
        if is_cancelled(shutdown) {
            return false;
        }
        match mediator.connect().await {
            Ok(()) => {
                tracing::info!(worker = %name, session = %cfg.session, mode = %cfg.mode, "Connected");
                return true;
            }
            Err(e) => tracing::warn!(
                worker = %name,
                "Connect failed: {e}, retrying in {}s",
                cfg.reconnect_delay_secs
            ),
        }
        tokio::select! {
            _ = tokio::time::sleep(cfg.reconnect_delay()) => {}
            _ = cancelled(shutdown) => return false,
        }
    }
}
