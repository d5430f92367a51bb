use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Static evolutionary parameters. Serializable, so they travel inside
/// every work request and the worker sees exactly what the client used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridParams {
    /// Target population size on each worker
    pub population_size: usize,
    /// Requests generated per cycle
    pub fan_out: usize,
    /// Share of `population_size` placed into each fragment
    pub fragment_fraction: f64,
    /// Share of each fragment taken from the elite head
    pub elite_fraction: f64,
    /// Local evolution cycles per work unit
    pub worker_cycles: u32,
    /// Candidates returned by the top-k return strategy
    pub return_top_k: usize,
    /// Run stops once the completed cycle count exceeds this
    pub max_cycles: u64,
    /// Run stops once the best fitness reaches this
    pub fitness_threshold: Option<f64>,
    /// Workers drop candidates below this before reporting
    pub min_fitness_to_report: Option<f64>,
    /// Genome length for the vector engines
    pub dimensions: usize,
    pub seed: Option<u64>,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            population_size: 100,
            fan_out: 20,
            fragment_fraction: 0.10,
            elite_fraction: 0.8,
            worker_cycles: 40,
            return_top_k: 1,
            max_cycles: 50,
            fitness_threshold: None,
            min_fitness_to_report: None,
            dimensions: 8,
            seed: None,
        }
    }
}

impl GridParams {
    /// Candidates per fragment: `ceil(population_size * fragment_fraction)`
    pub fn fragment_size(&self) -> usize {
        (self.population_size as f64 * self.fragment_fraction).ceil() as usize
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::invalid("population_size", "must be greater than zero"));
        }
        if self.fan_out == 0 {
            return Err(ConfigError::invalid("fan_out", "must be greater than zero"));
        }
        for (name, value) in [
            ("fragment_fraction", self.fragment_fraction),
            ("elite_fraction", self.elite_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(name, "must lie in [0, 1]"));
            }
        }
        if self.return_top_k == 0 {
            return Err(ConfigError::invalid("return_top_k", "must be greater than zero"));
        }
        Ok(())
    }
}
