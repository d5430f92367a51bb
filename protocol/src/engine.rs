//! Evolution engine seam.
//!
//! The grid never evaluates or breeds candidates itself; it asks an
//! [`EvolutionEngine`] to. `SphereEngine` is the stock engine used by the
//! built-in configurations.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde_json::Value;

use crate::params::GridParams;
use crate::types::{Candidate, Population};

pub trait EvolutionEngine: Send + Sync {
    fn name(&self) -> &str;

    /// A freshly generated, already evaluated candidate
    fn random_candidate(&self, params: &GridParams, rng: &mut StdRng) -> Candidate;

    /// One generation in place. The population keeps its length.
    fn evolve_cycle(&self, population: &mut Population, params: &GridParams, rng: &mut StdRng);
}

/// Maximise `-Σ x²` over real vectors in `[-bound, bound]^dimensions`.
///
/// Truncation selection keeps the better half; the rest is refilled with
/// gaussian mutants of random survivors.
#[derive(Debug, Clone)]
pub struct SphereEngine {
    pub bound: f64,
    pub sigma: f64,
}

impl Default for SphereEngine {
    fn default() -> Self {
        Self { bound: 5.12, sigma: 0.3 }
    }
}

impl SphereEngine {
    pub fn fitness(genes: &[f64]) -> f64 {
        -genes.iter().map(|x| x * x).sum::<f64>()
    }

    fn decode(genome: &Value) -> Vec<f64> {
        serde_json::from_value(genome.clone()).unwrap_or_default()
    }

    fn candidate(genes: Vec<f64>) -> Candidate {
        let fitness = Self::fitness(&genes);
        Candidate::new(fitness, Value::from(genes))
    }

    fn mutate(&self, parent: &[f64], rng: &mut StdRng) -> Vec<f64> {
        parent
            .iter()
            .map(|&x| {
                let z: f64 = rng.sample(StandardNormal);
                (x + z * self.sigma).clamp(-self.bound, self.bound)
            })
            .collect()
    }
}

impl EvolutionEngine for SphereEngine {
    fn name(&self) -> &str {
        "sphere"
    }

    fn random_candidate(&self, params: &GridParams, rng: &mut StdRng) -> Candidate {
        let genes: Vec<f64> = (0..params.dimensions)
            .map(|_| rng.gen_range(-self.bound..=self.bound))
            .collect();
        Self::candidate(genes)
    }

    fn evolve_cycle(&self, population: &mut Population, params: &GridParams, rng: &mut StdRng) {
        let len = population.len();
        if len < 2 {
            return;
        }
        population.sort_by_fitness();
        let survivors = len.div_ceil(2);

        let parents: Vec<Vec<f64>> = population.members[..survivors]
            .iter()
            .map(|c| Self::decode(&c.genome))
            .collect();
        // breeding is sequential so one seed reproduces the run
        let children: Vec<Vec<f64>> = (survivors..len)
            .map(|_| {
                let parent = &parents[rng.gen_range(0..parents.len())];
                if parent.len() == params.dimensions {
                    self.mutate(parent, rng)
                } else {
                    // unreadable genome: start over from scratch
                    (0..params.dimensions).map(|_| rng.gen_range(-self.bound..=self.bound)).collect()
                }
            })
            .collect();

        let evaluated: Vec<Candidate> = children.into_par_iter().map(Self::candidate).collect();
        population.members.truncate(survivors);
        population.members.extend(evaluated);
    }
}
