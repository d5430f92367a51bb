//! Client-side main loop.
//!
//! ```text
//!   ┌────────────────┐   ┌────────────────┐   ┌─────────────┐   ┌──────────────────┐
//!   │SendingRequests │──►│AwaitingResults │──►│ LocalEvolve │──►│ CheckTermination │──┐
//!   └────────────────┘   └────────────────┘   └─────────────┘   └──────────────────┘  │
//!           ▲                                                        │    │            │
//!           └────────────────────────── next cycle ──────────────────┘    ▼            ▼
//!                                                                      Finished   Interrupted
//! ```
//!
//! One batch per cycle. Results are correlated with the batch by request id,
//! never by arrival position; every result of a cycle is merged before its
//! termination check.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::GridConfig;
use crate::error::{ConfigError, OrchestratorError, TransportError};
use crate::message::{Envelope, MessageContext, WireMessage, WorkRequest, WorkResult};
use crate::shutdown::{cancelled, is_cancelled, ShutdownReceiver};
use crate::transport::{Mediator, NetworkMode, PollOptions, RetryPolicy};
use crate::types::{Candidate, Population};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SendingRequests,
    AwaitingResults,
    LocalEvolve,
    CheckTermination,
    Finished,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Interrupted,
}

/// Summary of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Completed cycles
    pub cycles: u64,
    pub best: Option<Candidate>,
    pub population: Population,
    pub results_merged: u64,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub session: String,
    /// Skip sending; drain one receive window, merge, check once, stop
    pub receive_only: bool,
    /// Wait per result. `max_wait: None` waits indefinitely.
    pub result_poll: PollOptions,
    /// Empty polls tolerated per cycle before the missing results are
    /// written off
    pub max_poll_attempts: u32,
    /// Receive window for receive-only runs when `result_poll` has no bound
    pub receive_window: Duration,
    pub retry: RetryPolicy,
}

impl OrchestratorOptions {
    /// LAN blocks on every result; WAN polls every second for up to 30s per
    /// result and gives up after 10 empty polls in one cycle.
    pub fn for_mode(mode: NetworkMode, session: &str) -> Self {
        let (result_poll, max_poll_attempts) = match mode {
            NetworkMode::Lan => (PollOptions::forever(), u32::MAX),
            NetworkMode::Wan => (PollOptions::wait(Duration::from_secs(30), Duration::from_secs(1)), 10),
        };
        Self {
            session: session.to_string(),
            receive_only: false,
            result_poll,
            max_poll_attempts,
            receive_window: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn receive_only(mut self, receive_only: bool) -> Self {
        self.receive_only = receive_only;
        self
    }
}

pub struct Orchestrator {
    config: GridConfig,
    mediator: Arc<dyn Mediator>,
    options: OrchestratorOptions,
    phase: Phase,
}

impl Orchestrator {
    /// `config` must have passed [`GridConfig::validate`]
    pub fn new(
        config: GridConfig,
        mediator: Arc<dyn Mediator>,
        options: OrchestratorOptions,
    ) -> Result<Self, OrchestratorError> {
        if !config.is_validated() {
            return Err(ConfigError::NotValidated(config.name().to_string()).into());
        }
        Ok(Self { config, mediator, options, phase: Phase::SendingRequests })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run until the client strategy says stop or `shutdown` fires. The
    /// mediator is stopped on every exit path.
    pub async fn run(mut self, shutdown: ShutdownReceiver) -> Result<RunReport, OrchestratorError> {
        let outcome = self.drive(shutdown).await;
        self.mediator.stop().await;
        match &outcome {
            Ok(report) => tracing::info!(
                session = %self.options.session,
                outcome = ?report.outcome,
                cycles = report.cycles,
                best = ?report.best.as_ref().map(|c| c.fitness),
                "Run ended"
            ),
            Err(e) => tracing::error!(session = %self.options.session, phase = ?self.phase, "Run failed: {e}"),
        }
        outcome
    }

    async fn drive(&mut self, mut shutdown: ShutdownReceiver) -> Result<RunReport, OrchestratorError> {
        let mut client = self.config.build_client_evolve()?;
        let split = self.config.split().ok_or(ConfigError::MissingStrategy("split"))?;
        let feedback = self.config.feedback();

        self.mediator.connect().await?;
        client.initialize(&mut self.config, feedback.as_ref())?;

        let template = self.config.template_request(&self.options.session);
        let mut cycle: u64 = 0;
        let mut merged: u64 = 0;

        tracing::info!(
            session = %self.options.session,
            config = %self.config.name(),
            mode = %self.mediator.mode(),
            receive_only = self.options.receive_only,
            "🚀 Orchestrator started"
        );

        loop {
            if is_cancelled(&shutdown) {
                break;
            }

            self.phase = Phase::SendingRequests;
            let mut outstanding = HashSet::new();
            if !self.options.receive_only {
                let requests = client.generate_work_requests(&template, split.as_ref(), cycle, &mut self.config);
                feedback.progress_bounds(0, requests.len() as u64);
                match self.send_batch(requests, &shutdown).await {
                    Some(sent) => outstanding = sent,
                    None => break,
                }
            }
            client.after_work_requests_sent();

            self.phase = Phase::AwaitingResults;
            let Some(results) = self.collect_results(&outstanding, &mut shutdown).await? else {
                break;
            };
            for (received, result) in results.iter().enumerate() {
                client.result_received(result);
                feedback.progress(received as u64 + 1);
                if let Err(e) = self
                    .mediator
                    .backup_result(result, &self.options.session, self.config.name())
                    .await
                {
                    tracing::warn!(id = %result.id, "Result backup failed: {e}");
                }
            }
            merged += results.len() as u64;

            self.phase = Phase::LocalEvolve;
            client.evolve(&mut self.config)?;
            feedback.cycle_complete(cycle, client.best());

            cycle += 1;
            self.phase = Phase::CheckTermination;
            if self.options.receive_only || client.is_evolution_finished(cycle) {
                client.on_finished();
                feedback.finished(client.best());
                self.phase = Phase::Finished;
                return Ok(RunReport {
                    outcome: RunOutcome::Finished,
                    cycles: cycle,
                    best: client.best().cloned(),
                    population: client.population().clone(),
                    results_merged: merged,
                });
            }
        }

        feedback.interrupted();
        self.phase = Phase::Interrupted;
        Ok(RunReport {
            outcome: RunOutcome::Interrupted,
            cycles: cycle,
            best: client.best().cloned(),
            population: client.population().clone(),
            results_merged: merged,
        })
    }

    /// Ids of the requests that went out, or `None` when cancelled mid-batch
    async fn send_batch(&self, requests: Vec<WorkRequest>, shutdown: &ShutdownReceiver) -> Option<HashSet<String>> {
        let total = requests.len();
        let mut sent = HashSet::with_capacity(total);
        for request in requests {
            if is_cancelled(shutdown) {
                return None;
            }
            let id = request.id.clone();
            let chunk = request.chunk;
            let cycle = request.cycle;
            let envelope = Envelope::request(request).with_header("cycle", cycle.to_string());
            match self.options.retry.send(self.mediator.as_ref(), envelope).await {
                Ok(()) => {
                    sent.insert(id);
                }
                Err(e) => tracing::error!(request = %id, chunk = chunk, "Request dropped after retries: {e}"),
            }
        }
        tracing::info!(session = %self.options.session, sent = sent.len(), total = total, "Batch sent");
        Some(sent)
    }

    /// Results answering `outstanding`, or `None` when cancelled
    async fn collect_results(
        &self,
        outstanding: &HashSet<String>,
        shutdown: &mut ShutdownReceiver,
    ) -> Result<Option<Vec<WorkResult>>, OrchestratorError> {
        if self.options.receive_only {
            return self.drain_window(shutdown).await;
        }

        let context = MessageContext::results(&self.options.session);
        let mut pending = outstanding.clone();
        let mut results = Vec::with_capacity(pending.len());
        let mut misses = 0u32;

        while !pending.is_empty() {
            let received = tokio::select! {
                received = self.mediator.get_message(&context, &self.options.result_poll) => received,
                _ = cancelled(shutdown) => return Ok(None),
            };
            match received {
                Ok(Some(envelope)) => match envelope.message {
                    WireMessage::WorkResult(result) if pending.remove(&result.id) => {
                        tracing::debug!(id = %result.id, chunk = result.chunk, left = pending.len(), "Result received");
                        results.push(result);
                    }
                    WireMessage::WorkResult(result) => {
                        tracing::warn!(id = %result.id, chunk = result.chunk, "Unknown or duplicate result, dropped");
                    }
                    WireMessage::WorkRequest(request) => {
                        tracing::warn!(id = %request.id, "Request on result mailbox, dropped");
                    }
                },
                Ok(None) => {
                    misses += 1;
                    tracing::debug!(missing = pending.len(), attempt = misses, "No result yet");
                }
                Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
                Err(e) => {
                    misses += 1;
                    tracing::warn!(attempt = misses, "Receive failed: {e}");
                    tokio::time::sleep(self.options.result_poll.interval).await;
                }
            }
            if misses >= self.options.max_poll_attempts {
                tracing::warn!(missing = pending.len(), "Giving up on outstanding results this cycle");
                break;
            }
        }
        Ok(Some(results))
    }

    async fn drain_window(&self, shutdown: &mut ShutdownReceiver) -> Result<Option<Vec<WorkResult>>, OrchestratorError> {
        let context = MessageContext::results(&self.options.session);
        let window = self.options.result_poll.max_wait.unwrap_or(self.options.receive_window);
        let deadline = Instant::now() + window;
        let mut results = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let poll = PollOptions { max_wait: Some(remaining), ..self.options.result_poll.clone() };
            let received = tokio::select! {
                received = self.mediator.get_message(&context, &poll) => received?,
                _ = cancelled(shutdown) => return Ok(None),
            };
            match received {
                Some(Envelope { message: WireMessage::WorkResult(result), .. })
                    if result.session == self.options.session =>
                {
                    results.push(result)
                }
                Some(other) => tracing::warn!(id = %other.message.id(), "Foreign message in receive window, dropped"),
                None => break,
            }
        }
        tracing::info!(received = results.len(), "Receive window drained");
        Ok(Some(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::Feedback;
    use crate::message::ResultPayload;
    use crate::params::GridParams;
    use crate::registry::Registry;
    use crate::shutdown;
    use crate::transport::{MemoryStore, StoreMediator};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers every request instantly, newest first, after a stray result
    #[derive(Default)]
    struct Scripted {
        inbox: Mutex<VecDeque<Envelope>>,
        sent: AtomicUsize,
        fail_sends: bool,
        hang: bool,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl Mediator for Scripted {
        fn mode(&self) -> NetworkMode {
            NetworkMode::Wan
        }

        async fn connect(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
            if self.fail_sends {
                return Err(TransportError::Rejected(503));
            }
            let WireMessage::WorkRequest(request) = envelope.message else {
                return Ok(());
            };
            let mut inbox = self.inbox.lock().unwrap();
            if self.sent.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut stray = WorkResult::empty(&request);
                stray.id = "stray".into();
                inbox.push_back(Envelope::result(stray));
            }
            let best = Candidate::new(-(request.chunk as f64), json!([request.chunk]));
            inbox.push_front(Envelope::result(WorkResult::for_request(&request, ResultPayload::SingleBest(best))));
            Ok(())
        }

        async fn get_message(
            &self,
            _context: &MessageContext,
            _poll: &PollOptions,
        ) -> Result<Option<Envelope>, TransportError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.inbox.lock().unwrap().pop_front())
        }

        async fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        async fn backup_result(&self, _: &WorkResult, _: &str, _: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Feedback for Recorder {
        fn progress_bounds(&self, min: u64, max: u64) {
            self.0.lock().unwrap().push(format!("bounds:{min}..{max}"));
        }

        fn cycle_complete(&self, cycle: u64, _best: Option<&Candidate>) {
            self.0.lock().unwrap().push(format!("cycle:{cycle}"));
        }

        fn interrupted(&self) {
            self.0.lock().unwrap().push("interrupted".into());
        }

        fn finished(&self, _best: Option<&Candidate>) {
            self.0.lock().unwrap().push("finished".into());
        }
    }

    fn config(fan_out: usize, max_cycles: u64) -> GridConfig {
        let registry = Registry::with_defaults();
        let mut config = registry.build("sphere").unwrap();
        config.set_params(GridParams { fan_out, max_cycles, ..Default::default() });
        config.validate().unwrap();
        config
    }

    fn options() -> OrchestratorOptions {
        let mut options = OrchestratorOptions::for_mode(NetworkMode::Wan, "s");
        options.result_poll = PollOptions::wait(Duration::from_millis(20), Duration::from_millis(5));
        options.max_poll_attempts = 3;
        options.retry = RetryPolicy::exponential(2, Duration::from_millis(1));
        options
    }

    #[test]
    fn test_unvalidated_config_is_rejected() {
        let mut config = config(2, 0);
        config.set_params(GridParams::default());
        let mediator = Arc::new(Scripted::default());
        let err = Orchestrator::new(config, mediator, options()).err().unwrap();
        assert!(matches!(err, OrchestratorError::Config(ConfigError::NotValidated(_))));
    }

    #[tokio::test]
    async fn test_out_of_order_results_are_correlated_by_id() {
        let mut config = config(4, 0);
        let recorder = Arc::new(Recorder::default());
        config.set_feedback(recorder.clone());
        let mediator = Arc::new(Scripted::default());
        let (_tx, rx) = shutdown::channel();

        let report = Orchestrator::new(config, mediator.clone(), options()).unwrap().run(rx).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Finished);
        assert_eq!(report.cycles, 1);
        assert_eq!(report.results_merged, 4);
        assert_eq!(report.population.len(), 4);
        assert_eq!(report.best.map(|c| c.fitness), Some(0.0));
        assert!(mediator.stopped.load(Ordering::SeqCst));
        assert_eq!(*recorder.0.lock().unwrap(), vec!["bounds:0..4", "cycle:0", "finished"]);
    }

    #[tokio::test]
    async fn test_runs_until_cycles_exceed_max() {
        let mediator = Arc::new(Scripted::default());
        let (_tx, rx) = shutdown::channel();
        let report = Orchestrator::new(config(2, 2), mediator.clone(), options()).unwrap().run(rx).await.unwrap();
        assert_eq!(report.cycles, 3);
        assert_eq!(mediator.sent.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_failed_sends_are_skipped() {
        let mediator = Arc::new(Scripted { fail_sends: true, ..Default::default() });
        let (_tx, rx) = shutdown::channel();
        let report = Orchestrator::new(config(3, 0), mediator.clone(), options()).unwrap().run(rx).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Finished);
        assert_eq!(report.results_merged, 0);
        assert!(mediator.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_stops_mediator() {
        let mut config = config(2, 10);
        let recorder = Arc::new(Recorder::default());
        config.set_feedback(recorder.clone());
        let mediator = Arc::new(Scripted { hang: true, ..Default::default() });
        let (tx, rx) = shutdown::channel();

        let run = tokio::spawn(Orchestrator::new(config, mediator.clone(), options()).unwrap().run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(2), run).await.unwrap().unwrap().unwrap();
        assert_eq!(report.outcome, RunOutcome::Interrupted);
        assert_eq!(report.cycles, 0);
        assert!(mediator.stopped.load(Ordering::SeqCst));
        assert!(recorder.0.lock().unwrap().contains(&"interrupted".to_string()));
    }

    #[tokio::test]
    async fn test_receive_only_drains_one_window() {
        let store = MemoryStore::new();
        let mediator = Arc::new(StoreMediator::new(store.clone()));
        mediator.connect().await.unwrap();
        let template = WorkRequest::template("s", "sphere", GridParams::default());
        for chunk in 0..2 {
            let request = template.fragment(chunk, 0, Population::default());
            let best = Candidate::new(-1.0 - chunk as f64, json!([1.0]));
            mediator
                .send(Envelope::result(WorkResult::for_request(&request, ResultPayload::SingleBest(best))))
                .await
                .unwrap();
        }

        let (_tx, rx) = shutdown::channel();
        let options = options().receive_only(true);
        let report = Orchestrator::new(config(5, 50), mediator, options).unwrap().run(rx).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Finished);
        assert_eq!(report.cycles, 1);
        assert_eq!(report.results_merged, 2);
        assert_eq!(report.best.map(|c| c.fitness), Some(-1.0));
        assert_eq!(store.pending(&MessageContext::requests("s")), 0);
    }
}
