use super::{LocalState, WorkerEvolveStrategy};
use crate::config::GridConfig;
use crate::error::StrategyError;

/// Runs `worker_cycles` engine cycles
#[derive(Debug, Default, Clone)]
pub struct FixedCycles;

impl WorkerEvolveStrategy for FixedCycles {
    fn name(&self) -> &str {
        "fixed-cycles"
    }

    fn evolve(&self, state: &mut LocalState, config: &mut GridConfig) -> Result<(), StrategyError> {
        let engine = config.engine().ok_or(StrategyError::MissingEngine)?;
        let params = config.params().clone();
        let rng = config.rng();
        for _ in 0..params.worker_cycles {
            engine.evolve_cycle(&mut state.population, &params, rng);
            state.cycles_run += 1;
        }
        Ok(())
    }
}
