use super::{LocalState, WorkerReturnStrategy};
use crate::message::{ResultPayload, WorkRequest, WorkResult};
use crate::types::{Candidate, Population};

/// Threshold from the request, falling back to its params
fn report_threshold(request: &WorkRequest) -> Option<f64> {
    request.min_fitness_to_report.or(request.params.min_fitness_to_report)
}

fn reportable(request: &WorkRequest, candidate: &Candidate) -> bool {
    match report_threshold(request) {
        Some(min) => candidate.fitness >= min,
        None => !candidate.fitness.is_nan(),
    }
}

/// Local state that produced nothing: log loudly, report nothing
fn nothing_to_report(request: &WorkRequest, state: Option<&LocalState>) -> Option<WorkResult> {
    match state {
        Some(state) if !state.population.is_empty() => None,
        _ => {
            tracing::error!(
                request = %request.id,
                chunk = request.chunk,
                "Work unit produced no population, returning empty result"
            );
            Some(WorkResult::empty(request))
        }
    }
}

/// Reports the single fittest candidate
#[derive(Debug, Default, Clone)]
pub struct FittestReturn;

impl WorkerReturnStrategy for FittestReturn {
    fn name(&self) -> &str {
        "fittest"
    }

    fn assemble(&self, request: &WorkRequest, state: Option<&LocalState>) -> WorkResult {
        if let Some(empty) = nothing_to_report(request, state) {
            return empty;
        }
        let best = state
            .and_then(|s| s.population.fittest())
            .filter(|c| reportable(request, c))
            .cloned();
        let payload = match best {
            Some(candidate) => ResultPayload::SingleBest(candidate),
            None => ResultPayload::Empty,
        };
        WorkResult::for_request(request, payload)
    }
}

/// Reports the best `return_top_k` candidates as a population
#[derive(Debug, Default, Clone)]
pub struct TopKReturn;

impl WorkerReturnStrategy for TopKReturn {
    fn name(&self) -> &str {
        "top-k"
    }

    fn assemble(&self, request: &WorkRequest, state: Option<&LocalState>) -> WorkResult {
        if let Some(empty) = nothing_to_report(request, state) {
            return empty;
        }
        let k = request.params.return_top_k.max(1);
        let top: Vec<Candidate> = state
            .map(|s| s.population.top(k))
            .unwrap_or_default()
            .into_iter()
            .filter(|c| reportable(request, c))
            .collect();
        let payload = if top.is_empty() {
            ResultPayload::Empty
        } else {
            ResultPayload::Population(Population::filled(top))
        };
        WorkResult::for_request(request, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GridParams;
    use serde_json::json;

    fn request(top_k: usize, min: Option<f64>) -> WorkRequest {
        let params = GridParams { return_top_k: top_k, ..Default::default() };
        let mut req = WorkRequest::template("s", "sphere", params).fragment(2, 1, Population::default());
        req.min_fitness_to_report = min;
        req
    }

    fn state(fitnesses: &[f64]) -> LocalState {
        LocalState::new(Population::filled(
            fitnesses.iter().map(|&f| Candidate::new(f, json!(null))).collect(),
        ))
    }

    #[test]
    fn test_fittest_returns_single_best() {
        let req = request(1, None);
        let result = FittestReturn.assemble(&req, Some(&state(&[-3.0, -0.5, -9.0])));
        assert_eq!(result.id, req.id);
        assert_eq!(result.chunk, 2);
        match result.payload {
            ResultPayload::SingleBest(c) => assert_eq!(c.fitness, -0.5),
            other => panic!("expected single best, got {other:?}"),
        }
    }

    #[test]
    fn test_absent_or_empty_state_gives_empty_payload() {
        let req = request(1, None);
        assert!(FittestReturn.assemble(&req, None).payload.is_empty());
        assert!(FittestReturn.assemble(&req, Some(&LocalState::default())).payload.is_empty());
        assert!(TopKReturn.assemble(&req, None).payload.is_empty());
    }

    #[test]
    fn test_top_k_returns_best_k_as_population() {
        let req = request(2, None);
        let result = TopKReturn.assemble(&req, Some(&state(&[-3.0, -0.5, -9.0, -1.0])));
        match result.payload {
            ResultPayload::Population(p) => {
                let f: Vec<f64> = p.iter().map(|c| c.fitness).collect();
                assert_eq!(f, vec![-0.5, -1.0]);
                assert!(p.is_full());
            }
            other => panic!("expected population, got {other:?}"),
        }
    }

    #[test]
    fn test_min_fitness_filters_report() {
        let req = request(3, Some(-1.0));
        let result = TopKReturn.assemble(&req, Some(&state(&[-3.0, -0.5, -9.0, -1.0])));
        assert_eq!(result.payload.candidate_count(), 2);

        let strict = request(1, Some(0.0));
        let result = FittestReturn.assemble(&strict, Some(&state(&[-3.0, -0.5])));
        assert!(result.payload.is_empty());
    }
}
