use rand::Rng;

use super::SplitStrategy;
use crate::config::GridConfig;
use crate::message::WorkRequest;
use crate::types::{Candidate, Population};

/// Mostly-elite fragments with a share of ordinary candidates mixed in.
///
/// Each fragment holds `fragment_size()` candidates: `elite_fraction` of
/// them are taken from the elite head of the sorted population (the window
/// rotates per chunk so fragments differ), the rest are drawn uniformly
/// from everything below the head. The first cycle, or a population too
/// small to fill one fragment, yields empty fragments.
#[derive(Debug, Default, Clone)]
pub struct ElitistSplit;

impl ElitistSplit {
    fn fragment(
        chunk: usize,
        sorted: &[Candidate],
        head_len: usize,
        elites: usize,
        ordinary: usize,
        rng: &mut impl Rng,
    ) -> Population {
        let mut members = Vec::with_capacity(elites + ordinary);
        let head = &sorted[..head_len];
        let start = (chunk * elites) % head_len;
        members.extend((0..elites).map(|i| head[(start + i) % head_len].clone()));

        let tail = if sorted.len() > head_len { &sorted[head_len..] } else { sorted };
        members.extend((0..ordinary).map(|_| tail[rng.gen_range(0..tail.len())].clone()));
        Population::filled(members)
    }
}

impl SplitStrategy for ElitistSplit {
    fn name(&self) -> &str {
        "elitist"
    }

    fn split(
        &self,
        template: &WorkRequest,
        population: &Population,
        cycle: u64,
        config: &mut GridConfig,
    ) -> Vec<WorkRequest> {
        let params = config.params().clone();
        let fan_out = params.fan_out;
        let size = params.fragment_size();

        if cycle == 0 || size == 0 || population.len() < size {
            if cycle > 0 && size > 0 {
                tracing::debug!(
                    available = population.len(),
                    needed = size,
                    "Population too small to slice, sending empty fragments"
                );
            }
            return (0..fan_out)
                .map(|chunk| template.fragment(chunk as u32, cycle, Population::default()))
                .collect();
        }

        let mut sorted = population.clone();
        sorted.sort_by_fitness();
        let sorted = sorted.into_members();

        let elites = ((size as f64 * params.elite_fraction).round() as usize).min(size);
        let ordinary = size - elites;
        let head_len = ((sorted.len() as f64 * params.elite_fraction).ceil() as usize)
            .max(elites)
            .clamp(1, sorted.len());

        let rng = config.rng();
        (0..fan_out)
            .map(|chunk| {
                let fragment = Self::fragment(chunk, &sorted, head_len, elites, ordinary, &mut *rng);
                template.fragment(chunk as u32, cycle, fragment)
            })
            .collect()
    }
}
