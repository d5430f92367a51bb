use crate::types::Candidate;

/// Progress listener for a run. Every hook defaults to doing nothing.
pub trait Feedback: Send + Sync {
    fn progress_bounds(&self, _min: u64, _max: u64) {}

    fn progress(&self, _value: u64) {}

    fn cycle_complete(&self, _cycle: u64, _best: Option<&Candidate>) {}

    fn interrupted(&self) {}

    fn finished(&self, _best: Option<&Candidate>) {}
}

/// Reports progress through `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingFeedback;

impl Feedback for TracingFeedback {
    fn progress(&self, value: u64) {
        tracing::debug!(received = value, "Cycle progress");
    }

    fn cycle_complete(&self, cycle: u64, best: Option<&Candidate>) {
        tracing::info!(cycle = cycle, best = ?best.map(|c| c.fitness), "Cycle complete");
    }

    fn interrupted(&self) {
        tracing::warn!("Evolution interrupted");
    }

    fn finished(&self, best: Option<&Candidate>) {
        tracing::info!(best = ?best.map(|c| c.fitness), "Evolution complete");
    }
}
