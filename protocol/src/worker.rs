//! Worker runtime: turns one [`WorkRequest`] into one [`WorkResult`].
//!
//! A worker owns no run state. Every request brings its own params,
//! strategy names and engine name; the worker resolves them against its
//! [`Registry`] and evolves the fragment under a freshly scoped
//! [`GridConfig`]. A configuration the worker never registered (a client's
//! `--config-file`) is built from the request alone.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::GridConfig;
use crate::error::{ConfigError, StrategyError, TransportError};
use crate::message::{Envelope, MessageContext, WireMessage, WorkRequest, WorkResult};
use crate::registry::Registry;
use crate::shutdown::{cancelled, is_cancelled, ShutdownReceiver};
use crate::transport::{Mediator, PollOptions, RetryPolicy};

/// Totals for one [`GridWorker::run`] loop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub handled: u64,
    pub empty: u64,
    pub send_failures: u64,
}

pub struct GridWorker {
    name: String,
    registry: Arc<Registry>,
    retry: RetryPolicy,
    /// Validated base configs, by configuration name
    bases: Mutex<HashMap<String, Arc<GridConfig>>>,
}

impl GridWorker {
    pub fn new(name: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            name: name.into(),
            registry,
            retry: RetryPolicy::default(),
            bases: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn base_config(&self, config_id: &str) -> Result<Arc<GridConfig>, ConfigError> {
        let mut bases = self.bases.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(base) = bases.get(config_id) {
            return Ok(base.clone());
        }
        let base = Arc::new(self.registry.build(config_id)?);
        bases.insert(config_id.to_string(), base.clone());
        Ok(base)
    }

    /// Process one request. Never fails: strategy errors and panics become
    /// an empty result.
    pub fn handle(&self, request: &WorkRequest) -> WorkResult {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process(request)));
        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(
                    worker = %self.name,
                    request = %request.id,
                    chunk = request.chunk,
                    "Work unit failed: {e}"
                );
                WorkResult::empty(request)
            }
            Err(payload) => {
                tracing::error!(
                    worker = %self.name,
                    request = %request.id,
                    chunk = request.chunk,
                    "Work unit panicked: {}",
                    panic_message(payload.as_ref())
                );
                WorkResult::empty(request)
            }
        };
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.worker = Some(self.name.clone());
        result
    }

    fn process(&self, request: &WorkRequest) -> Result<WorkResult, StrategyError> {
        let mut config = match self.base_config(&request.config_id) {
            Ok(base) => base.for_work_unit(request, &self.registry)?,
            Err(ConfigError::UnknownName { kind: "configuration", .. }) => {
                tracing::debug!(config = %request.config_id, "Unregistered configuration, building from the request");
                GridConfig::from_request(request, &self.registry)?
            }
            Err(e) => return Err(e.into()),
        };

        let Some(initializer) = config.initializer() else {
            tracing::debug!(request = %request.id, "No initializer, answering with an empty result");
            return Ok(WorkResult::empty(request));
        };
        let mut state = initializer.setup(request, request.population.clone(), &mut config)?;

        if let Some(evolve) = config.worker_evolve() {
            evolve.evolve(&mut state, &mut config)?;
        }

        let worker_return = config
            .worker_return()
            .ok_or(ConfigError::MissingStrategy("worker-return"))?;
        let mut result = worker_return.assemble(request, Some(&state));
        result.units_of_work = state.cycles_run;
        Ok(result)
    }

    /// Poll `session`'s request mailbox until `shutdown` fires. The mediator
    /// must already be connected. Returns early only when the channel is
    /// closed by the peer.
    pub async fn run(
        self: Arc<Self>,
        mediator: Arc<dyn Mediator>,
        session: &str,
        poll: PollOptions,
        mut shutdown: ShutdownReceiver,
    ) -> Result<WorkerStats, TransportError> {
        let context = MessageContext::requests(session);
        let mut stats = WorkerStats::default();
        tracing::info!(worker = %self.name, mailbox = %context, mode = %mediator.mode(), "👷 Worker loop started");

        while !is_cancelled(&shutdown) {
            let received = tokio::select! {
                received = mediator.get_message(&context, &poll) => received,
                _ = cancelled(&mut shutdown) => break,
            };

            let envelope = match received {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue,
                Err(TransportError::Closed) => {
                    tracing::warn!(worker = %self.name, "Channel closed, worker loop ends");
                    return Err(TransportError::Closed);
                }
                Err(e) => {
                    tracing::warn!(worker = %self.name, "Receive failed: {e}");
                    tokio::time::sleep(poll.interval).await;
                    continue;
                }
            };

            let request = match envelope.message {
                WireMessage::WorkRequest(request) => request,
                WireMessage::WorkResult(result) => {
                    tracing::warn!(worker = %self.name, id = %result.id, "Ignoring result on request mailbox");
                    continue;
                }
            };

            tracing::debug!(worker = %self.name, request = %request.id, chunk = request.chunk, "Request received");
            let title = request.title.clone();
            let worker = self.clone();
            let result = match tokio::task::spawn_blocking(move || worker.handle(&request)).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(worker = %self.name, "Work unit task aborted: {e}");
                    continue;
                }
            };

            stats.handled += 1;
            if result.payload.is_empty() {
                stats.empty += 1;
            }
            tracing::info!(
                worker = %self.name,
                request = %result.id,
                chunk = result.chunk,
                best = ?result.payload.best().map(|c| c.fitness),
                duration_ms = result.duration_ms,
                "Work unit done"
            );
            if let Err(e) = mediator.backup_result(&result, session, &title).await {
                tracing::warn!(worker = %self.name, "Result backup failed: {e}");
            }

            if let Err(e) = self.retry.send(mediator.as_ref(), Envelope::result(result)).await {
                tracing::error!(worker = %self.name, "Result dropped after retries: {e}");
                stats.send_failures += 1;
            }
        }

        tracing::info!(worker = %self.name, handled = stats.handled, "Worker loop stopped");
        Ok(stats)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::message::ResultPayload;
    use crate::params::GridParams;
    use crate::shutdown;
    use crate::strategy::{LocalState, WorkerEvolveStrategy};
    use crate::transport::{MemoryStore, StoreMediator};
    use crate::types::{Candidate, Population};
    use serde_json::json;
    use std::time::Duration;

    fn small_params() -> GridParams {
        GridParams { population_size: 20, worker_cycles: 3, dimensions: 4, seed: Some(7), ..Default::default() }
    }

    fn request(registry: &Registry, config_id: &str, population: Population) -> WorkRequest {
        let base = registry.build(config_id).unwrap();
        let mut template = base.template_request("s");
        template.params = small_params();
        template.fragment(0, 1, population)
    }

    struct Explode;

    impl WorkerEvolveStrategy for Explode {
        fn name(&self) -> &str {
            "explode"
        }

        fn evolve(&self, _state: &mut LocalState, _config: &mut GridConfig) -> Result<(), StrategyError> {
            panic!("boom");
        }
    }

    #[test]
    fn test_handle_evolves_empty_fragment() {
        let registry = Arc::new(Registry::with_defaults());
        let worker = GridWorker::new("w1", registry.clone());
        let req = request(&registry, "sphere", Population::default());

        let result = worker.handle(&req);
        assert_eq!(result.id, req.id);
        assert_eq!(result.worker.as_deref(), Some("w1"));
        assert_eq!(result.units_of_work, 3);
        assert!(matches!(result.payload, ResultPayload::SingleBest(_)));
    }

    #[test]
    fn test_partial_fragment_gives_empty_result() {
        let registry = Arc::new(Registry::with_defaults());
        let worker = GridWorker::new("w1", registry.clone());
        let mut fragment = Population::new(5);
        fragment.push(Candidate::new(-1.0, json!([0.0, 0.0, 0.0, 1.0])));
        let req = request(&registry, "sphere", fragment);

        let result = worker.handle(&req);
        assert!(result.payload.is_empty());
        assert_eq!(result.id, req.id);
    }

    #[test]
    fn test_ping_config_answers_empty() {
        let registry = Arc::new(Registry::with_defaults());
        let worker = GridWorker::new("w1", registry.clone());
        let req = request(&registry, "ping", Population::default());
        let result = worker.handle(&req);
        assert!(result.payload.is_empty());
        assert_eq!(result.units_of_work, 0);
    }

    #[test]
    fn test_unknown_config_without_engine_gives_empty_result() {
        let registry = Arc::new(Registry::with_defaults());
        let worker = GridWorker::new("w1", registry.clone());
        let mut req = request(&registry, "sphere", Population::default());
        req.config_id = "no-such-config".into();
        req.strategies.engine = None;
        assert!(worker.handle(&req).payload.is_empty());

        req.strategies.engine = Some("no-such-engine".into());
        assert!(worker.handle(&req).payload.is_empty());
    }

    #[test]
    fn test_client_only_config_runs_on_stock_worker() {
        let mut client_side = Registry::with_defaults();
        let mut node = client_side.node_config("sphere").unwrap();
        node.name = "wide".into();
        client_side.register_config(node);
        let req = request(&client_side, "wide", Population::default());

        let worker = GridWorker::new("w1", Arc::new(Registry::with_defaults()));
        let result = worker.handle(&req);
        assert!(matches!(result.payload, ResultPayload::SingleBest(_)));
        assert_eq!(result.units_of_work, 3);
    }

    #[test]
    fn test_panicking_strategy_gives_empty_result() {
        let mut registry = Registry::with_defaults();
        registry.register_worker_evolve("explode", || Arc::new(Explode));
        let mut node: NodeConfig = registry.node_config("sphere").unwrap();
        node.name = "explode".into();
        node.worker_evolve = Some("explode".into());
        registry.register_config(node);
        let registry = Arc::new(registry);

        let worker = GridWorker::new("w1", registry.clone());
        let req = request(&registry, "explode", Population::default());
        let result = worker.handle(&req);
        assert!(result.payload.is_empty());
        assert_eq!(result.worker.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_run_answers_every_request_then_stops() {
        let registry = Arc::new(Registry::with_defaults());
        let backups = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let mediator: Arc<dyn Mediator> =
            Arc::new(StoreMediator::new(store.clone()).with_backup_dir(Some(backups.path().to_path_buf())));
        mediator.connect().await.unwrap();

        let a = request(&registry, "sphere", Population::default());
        let b = request(&registry, "ping", Population::default());
        mediator.send(Envelope::request(a.clone())).await.unwrap();
        mediator.send(Envelope::request(b.clone())).await.unwrap();

        let (tx, rx) = shutdown::channel();
        let worker = Arc::new(GridWorker::new("w1", registry));
        let poll = PollOptions::wait(Duration::from_millis(100), Duration::from_millis(10));
        let handle = tokio::spawn({
            let mediator = mediator.clone();
            async move { worker.run(mediator, "s", poll, rx).await }
        });

        let mut ids = Vec::new();
        let results = MessageContext::results("s");
        let wait = PollOptions::wait(Duration::from_secs(5), Duration::from_millis(10));
        for _ in 0..2 {
            let envelope = mediator.get_message(&results, &wait).await.unwrap().unwrap();
            match envelope.message {
                WireMessage::WorkResult(r) => ids.push(r.id),
                other => panic!("expected result, got {other:?}"),
            }
        }
        ids.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ids, expected);

        tx.send(true).unwrap();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.handled, 2);
        assert_eq!(stats.empty, 1);
        assert_eq!(store.pending(&MessageContext::requests("s")), 0);
        assert_eq!(std::fs::read_dir(backups.path().join("s")).unwrap().count(), 2);
    }
}
