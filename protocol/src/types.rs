use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Unique candidate identifier
pub type CandidateId = String;

/// One fitness-scored unit of the search space.
///
/// The coordination layer never looks inside `genome`; only the evolution
/// engine decodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub fitness: f64,
    /// Individual count for composite candidates
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default)]
    pub genome: serde_json::Value,
}

fn default_size() -> usize { 1 }

impl Candidate {
    pub fn new(fitness: f64, genome: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            fitness,
            size: 1,
            genome,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

/// Orders candidates best-first. NaN fitness always sorts last.
pub fn by_fitness_desc(a: &Candidate, b: &Candidate) -> Ordering {
    match (a.fitness.is_nan(), b.fitness.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.fitness.partial_cmp(&a.fitness).unwrap_or(Ordering::Equal),
    }
}

/// An ordered collection of candidates with a target capacity.
///
/// A population that crosses a process boundary is either completely empty
/// or filled to `capacity`; anything in between is a partial fragment and
/// gets rejected by the initializer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub capacity: usize,
    #[serde(default)]
    pub members: Vec<Candidate>,
}

impl Population {
    /// Empty population with room for `capacity` candidates
    pub fn new(capacity: usize) -> Self {
        Self { capacity, members: Vec::with_capacity(capacity) }
    }

    /// A population whose capacity is exactly its member count
    pub fn filled(members: Vec<Candidate>) -> Self {
        Self { capacity: members.len(), members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Completely empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Non-empty and at (or above) the declared capacity
    pub fn is_full(&self) -> bool {
        !self.members.is_empty() && self.members.len() >= self.capacity
    }

    /// Non-empty but short of the declared capacity
    pub fn is_partially_filled(&self) -> bool {
        !self.members.is_empty() && self.members.len() < self.capacity
    }

    /// Sum of candidate sizes (individuals, not candidates)
    pub fn individual_count(&self) -> usize {
        self.members.iter().map(|c| c.size).sum()
    }

    pub fn push(&mut self, candidate: Candidate) {
        self.members.push(candidate);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.members.iter()
    }

    /// Sort best-first
    pub fn sort_by_fitness(&mut self) {
        self.members.sort_by(by_fitness_desc);
    }

    /// Best candidate without reordering the population
    pub fn fittest(&self) -> Option<&Candidate> {
        self.members.iter().min_by(|a, b| by_fitness_desc(a, b))
    }

    pub fn best_fitness(&self) -> Option<f64> {
        self.fittest().map(|c| c.fitness)
    }

    /// Clones of the `k` best candidates, best-first
    pub fn top(&self, k: usize) -> Vec<Candidate> {
        let mut sorted: Vec<&Candidate> = self.members.iter().collect();
        sorted.sort_by(|a, b| by_fitness_desc(a, b));
        sorted.into_iter().take(k).cloned().collect()
    }

    pub fn into_members(self) -> Vec<Candidate> {
        self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pop(fitnesses: &[f64], capacity: usize) -> Population {
        Population {
            capacity,
            members: fitnesses.iter().map(|&f| Candidate::new(f, json!(null))).collect(),
        }
    }

    #[test]
    fn test_fill_states() {
        assert!(pop(&[], 10).is_empty());
        assert!(!pop(&[], 10).is_partially_filled());
        assert!(pop(&[1.0, 2.0], 10).is_partially_filled());
        assert!(pop(&[1.0, 2.0], 2).is_full());
        assert!(Population::filled(vec![Candidate::new(0.5, json!(1))]).is_full());
    }

    #[test]
    fn test_sort_puts_nan_last() {
        let mut p = pop(&[1.0, f64::NAN, 3.0, 2.0], 4);
        p.sort_by_fitness();
        let order: Vec<f64> = p.iter().map(|c| c.fitness).collect();
        assert_eq!(&order[..3], &[3.0, 2.0, 1.0]);
        assert!(order[3].is_nan());
    }

    #[test]
    fn test_fittest_and_top() {
        let p = pop(&[-4.0, -1.0, -9.0, -2.0], 4);
        assert_eq!(p.best_fitness(), Some(-1.0));
        let top: Vec<f64> = p.top(2).iter().map(|c| c.fitness).collect();
        assert_eq!(top, vec![-1.0, -2.0]);
        // original order untouched
        assert_eq!(p.members[0].fitness, -4.0);
    }

    #[test]
    fn test_individual_count_uses_sizes() {
        let mut p = Population::new(2);
        p.push(Candidate::new(1.0, json!(null)).with_size(3));
        p.push(Candidate::new(2.0, json!(null)));
        assert_eq!(p.len(), 2);
        assert_eq!(p.individual_count(), 4);
    }
}
