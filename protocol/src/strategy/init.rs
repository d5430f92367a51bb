use super::{GenotypeInitializer, LocalState};
use crate::config::GridConfig;
use crate::error::StrategyError;
use crate::message::WorkRequest;
use crate::types::Population;

/// Empty fragment: a brand-new random population. Full fragment: the
/// fragment topped up with random candidates to `population_size`.
#[derive(Debug, Default, Clone)]
pub struct RandomTopUp;

impl GenotypeInitializer for RandomTopUp {
    fn name(&self) -> &str {
        "random-top-up"
    }

    fn setup(
        &self,
        request: &WorkRequest,
        fragment: Population,
        config: &mut GridConfig,
    ) -> Result<LocalState, StrategyError> {
        if fragment.is_partially_filled() {
            return Err(StrategyError::PartialFragment {
                len: fragment.len(),
                capacity: fragment.capacity,
            });
        }
        let engine = config.engine().ok_or(StrategyError::MissingEngine)?;
        let params = config.params().clone();
        let target = params.population_size;

        let seeded = fragment.len();
        let mut population = fragment;
        // never truncate a fragment larger than the target
        population.capacity = target.max(population.len());
        let rng = config.rng();
        while population.len() < target {
            population.push(engine.random_candidate(&params, rng));
        }

        tracing::debug!(
            request = %request.id,
            chunk = request.chunk,
            seeded = seeded,
            generated = population.len() - seeded,
            "Local population ready"
        );
        Ok(LocalState::new(population))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SphereEngine;
    use crate::params::GridParams;
    use crate::types::Candidate;
    use serde_json::json;
    use std::sync::Arc;

    fn config(size: usize) -> GridConfig {
        let mut config = GridConfig::new("test");
        config.set_params(GridParams { population_size: size, dimensions: 2, seed: Some(1), ..Default::default() });
        config.set_engine(Arc::new(SphereEngine::default()));
        config
    }

    fn request() -> WorkRequest {
        WorkRequest::template("s", "sphere", GridParams::default()).fragment(0, 0, Population::default())
    }

    #[test]
    fn test_empty_fragment_builds_full_population() {
        for size in [1usize, 17, 100] {
            let mut cfg = config(size);
            let state = RandomTopUp.setup(&request(), Population::default(), &mut cfg).unwrap();
            assert_eq!(state.population.len(), size);
            assert!(state.population.is_full());
        }
    }

    #[test]
    fn test_full_fragment_is_topped_up_and_kept() {
        let mut cfg = config(20);
        let seed = Candidate::new(0.0, json!([0.0, 0.0]));
        let fragment = Population::filled(vec![seed.clone(); 5]);

        let state = RandomTopUp.setup(&request(), fragment, &mut cfg).unwrap();

        assert_eq!(state.population.len(), 20);
        assert_eq!(state.population.iter().filter(|c| c.id == seed.id).count(), 5);
    }

    #[test]
    fn test_oversized_fragment_is_not_truncated() {
        let mut cfg = config(3);
        let fragment = Population::filled(vec![Candidate::new(-1.0, json!([1.0, 0.0])); 8]);
        let state = RandomTopUp.setup(&request(), fragment, &mut cfg).unwrap();
        assert_eq!(state.population.len(), 8);
    }

    #[test]
    fn test_partial_fragment_is_rejected() {
        let mut cfg = config(20);
        let fragment = Population {
            capacity: 10,
            members: vec![Candidate::new(-1.0, json!([1.0, 0.0])); 4],
        };
        let err = RandomTopUp.setup(&request(), fragment, &mut cfg).unwrap_err();
        assert!(matches!(err, StrategyError::PartialFragment { len: 4, capacity: 10 }));
    }

    #[test]
    fn test_missing_engine_is_an_error() {
        let mut cfg = GridConfig::new("bare");
        let err = RandomTopUp.setup(&request(), Population::default(), &mut cfg).unwrap_err();
        assert!(matches!(err, StrategyError::MissingEngine));
    }
}
