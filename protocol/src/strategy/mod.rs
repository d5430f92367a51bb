//! Pluggable policy objects.
//!
//! | Side   | Trait                     | Built-ins                      |
//! |--------|---------------------------|--------------------------------|
//! | client | [`SplitStrategy`]         | `elitist`                      |
//! | worker | [`GenotypeInitializer`]   | `random-top-up`                |
//! | worker | [`WorkerEvolveStrategy`]  | `fixed-cycles`                 |
//! | worker | [`WorkerReturnStrategy`]  | `fittest`, `top-k`             |
//! | client | [`ClientEvolveStrategy`]  | `default`, `local-evolve`      |
//!
//! Worker-side strategies are stateless and shared through `Arc`; anything
//! mutable they need (random generator, cache) comes from the work-unit
//! scoped [`GridConfig`]. The client strategy owns the canonical population
//! and is built fresh for every run.

mod client;
mod evolve;
mod init;
mod result;
mod split;

pub use client::DefaultClientEvolve;
pub use evolve::FixedCycles;
pub use init::RandomTopUp;
pub use result::{FittestReturn, TopKReturn};
pub use split::ElitistSplit;

use std::sync::Arc;

use crate::config::GridConfig;
use crate::error::StrategyError;
use crate::feedback::Feedback;
use crate::message::{WorkRequest, WorkResult};
use crate::params::GridParams;
use crate::types::{Candidate, Population};

/// A worker's population while it evolves one request
#[derive(Debug, Clone, Default)]
pub struct LocalState {
    pub population: Population,
    /// Engine cycles run so far
    pub cycles_run: u64,
}

impl LocalState {
    pub fn new(population: Population) -> Self {
        Self { population, cycles_run: 0 }
    }
}

/// Cuts the canonical population into one batch of requests.
pub trait SplitStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Exactly `fan_out` requests with chunks `0..fan_out`
    fn split(
        &self,
        template: &WorkRequest,
        population: &Population,
        cycle: u64,
        config: &mut GridConfig,
    ) -> Vec<WorkRequest>;
}

/// Builds a worker's local population from a request fragment.
pub trait GenotypeInitializer: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with [`StrategyError::PartialFragment`] when `fragment` is
    /// neither empty nor completely filled.
    fn setup(
        &self,
        request: &WorkRequest,
        fragment: Population,
        config: &mut GridConfig,
    ) -> Result<LocalState, StrategyError>;
}

/// Runs local evolution on a worker.
pub trait WorkerEvolveStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn evolve(&self, state: &mut LocalState, config: &mut GridConfig) -> Result<(), StrategyError>;
}

/// Decides what part of the evolved population goes back to the client.
pub trait WorkerReturnStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Never fails: absent or empty state yields an empty payload.
    fn assemble(&self, request: &WorkRequest, state: Option<&LocalState>) -> WorkResult;
}

/// Client-side policy owning the canonical population.
pub trait ClientEvolveStrategy: Send {
    fn name(&self) -> &str;

    /// One-time setup before the first cycle
    fn initialize(&mut self, config: &mut GridConfig, feedback: &dyn Feedback) -> Result<(), StrategyError>;

    fn population(&self) -> &Population;

    fn best(&self) -> Option<&Candidate>;

    /// Delegates to `split`; an empty canonical population is worth a
    /// warning, not an error.
    fn generate_work_requests(
        &mut self,
        template: &WorkRequest,
        split: &dyn SplitStrategy,
        cycle: u64,
        config: &mut GridConfig,
    ) -> Vec<WorkRequest>;

    /// Called once per cycle between sending and receiving. May only drop
    /// per-cycle scratch state.
    fn after_work_requests_sent(&mut self) {}

    /// Merge one result into the canonical population
    fn result_received(&mut self, result: &WorkResult);

    /// Client-side evolution between merge and termination check
    fn evolve(&mut self, _config: &mut GridConfig) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Pure: same input and same best fitness give the same answer
    fn is_evolution_finished(&self, cycles_done: u64) -> bool;

    fn on_finished(&mut self) {}
}

/// Builds a fresh client strategy for one run
pub type ClientEvolveFactory =
    Arc<dyn Fn(&GridParams) -> Box<dyn ClientEvolveStrategy> + Send + Sync>;
