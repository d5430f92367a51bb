use super::{ClientEvolveStrategy, SplitStrategy};
use crate::config::GridConfig;
use crate::error::StrategyError;
use crate::feedback::Feedback;
use crate::message::{ResultPayload, WorkRequest, WorkResult};
use crate::params::GridParams;
use crate::types::{by_fitness_desc, Candidate, Population};

/// Counters that only live for one cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub sent: usize,
    pub received: usize,
    pub merged: usize,
}

/// Canonical-population merge policy.
///
/// A `Population` result replaces the canonical population (full state
/// handoff); a `SingleBest` result is appended to it (incremental
/// improvement). Appends grow the population by up to `fan_out` per cycle,
/// so before each split it is cut back to its fittest `population_size`
/// candidates. With `local_cycles > 0` the client also evolves the
/// canonical population itself once per cycle.
pub struct DefaultClientEvolve {
    population: Population,
    best: Option<Candidate>,
    /// Most candidates kept between cycles; 0 keeps everything
    population_limit: usize,
    fitness_threshold: Option<f64>,
    max_cycles: u64,
    local_cycles: u32,
    stats: CycleStats,
}

impl DefaultClientEvolve {
    pub fn new(params: &GridParams) -> Self {
        Self {
            population: Population::new(params.population_size),
            best: None,
            population_limit: params.population_size,
            fitness_threshold: params.fitness_threshold,
            max_cycles: params.max_cycles,
            local_cycles: 0,
            stats: CycleStats::default(),
        }
    }

    pub fn with_local_cycles(mut self, cycles: u32) -> Self {
        self.local_cycles = cycles;
        self
    }

    /// Start from an existing canonical population
    pub fn with_population(mut self, population: Population) -> Self {
        self.best = population.fittest().cloned();
        self.population = population;
        self
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Keep the fittest `population_limit` candidates
    fn trim(&mut self) {
        if self.population_limit == 0 || self.population.len() <= self.population_limit {
            return;
        }
        let dropped = self.population.len() - self.population_limit;
        self.population.sort_by_fitness();
        self.population.members.truncate(self.population_limit);
        self.population.capacity = self.population_limit;
        tracing::debug!(dropped = dropped, kept = self.population_limit, "Canonical population trimmed");
    }

    fn track_best(&mut self, candidate: &Candidate) {
        let better = match &self.best {
            Some(best) => by_fitness_desc(candidate, best).is_lt(),
            None => !candidate.fitness.is_nan(),
        };
        if better {
            self.best = Some(candidate.clone());
        }
    }
}

impl ClientEvolveStrategy for DefaultClientEvolve {
    fn name(&self) -> &str {
        if self.local_cycles > 0 { "local-evolve" } else { "default" }
    }

    fn initialize(&mut self, config: &mut GridConfig, feedback: &dyn Feedback) -> Result<(), StrategyError> {
        let params = config.params();
        self.fitness_threshold = params.fitness_threshold;
        self.max_cycles = params.max_cycles;
        self.population_limit = params.population_size;
        if self.population.capacity == 0 {
            self.population.capacity = params.population_size;
        }
        feedback.progress(0);
        tracing::info!(
            config = %config.name(),
            max_cycles = self.max_cycles,
            threshold = ?self.fitness_threshold,
            seeded = self.population.len(),
            "Client evolution initialized"
        );
        Ok(())
    }

    fn population(&self) -> &Population {
        &self.population
    }

    fn best(&self) -> Option<&Candidate> {
        self.best.as_ref()
    }

    fn generate_work_requests(
        &mut self,
        template: &WorkRequest,
        split: &dyn SplitStrategy,
        cycle: u64,
        config: &mut GridConfig,
    ) -> Vec<WorkRequest> {
        if self.population.is_empty() {
            tracing::warn!(cycle = cycle, "Canonical population is empty, workers start from scratch");
        }
        self.trim();
        let requests = split.split(template, &self.population, cycle, config);
        self.stats = CycleStats { sent: requests.len(), ..CycleStats::default() };
        requests
    }

    fn after_work_requests_sent(&mut self) {
        self.stats.received = 0;
        self.stats.merged = 0;
    }

    fn result_received(&mut self, result: &WorkResult) {
        self.stats.received += 1;
        match &result.payload {
            ResultPayload::Empty => {
                tracing::debug!(chunk = result.chunk, "Empty result, nothing to merge");
            }
            ResultPayload::SingleBest(candidate) => {
                self.track_best(candidate);
                self.population.push(candidate.clone());
                self.population.capacity = self.population.capacity.max(self.population.len());
                self.stats.merged += 1;
            }
            ResultPayload::Population(population) => {
                if population.is_empty() {
                    return;
                }
                if let Some(best) = population.fittest() {
                    let best = best.clone();
                    self.track_best(&best);
                }
                self.population = population.clone();
                self.stats.merged += 1;
            }
        }
    }

    fn evolve(&mut self, config: &mut GridConfig) -> Result<(), StrategyError> {
        if self.local_cycles == 0 || self.population.len() < 2 {
            return Ok(());
        }
        let engine = config.engine().ok_or(StrategyError::MissingEngine)?;
        let params = config.params().clone();
        let rng = config.rng();
        for _ in 0..self.local_cycles {
            engine.evolve_cycle(&mut self.population, &params, rng);
        }
        if let Some(best) = self.population.fittest().cloned() {
            self.track_best(&best);
        }
        Ok(())
    }

    fn is_evolution_finished(&self, cycles_done: u64) -> bool {
        let reached = match (self.fitness_threshold, &self.best) {
            (Some(threshold), Some(best)) => best.fitness >= threshold,
            _ => false,
        };
        reached || cycles_done > self.max_cycles
    }

    fn on_finished(&mut self) {
        match &self.best {
            Some(best) => tracing::info!(
                fitness = best.fitness,
                candidate = %best.id,
                population = self.population.len(),
                "🏁 Evolution finished"
            ),
            None => tracing::warn!("Evolution finished without any candidate"),
        }
    }
}
