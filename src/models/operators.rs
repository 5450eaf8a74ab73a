//! Caller-supplied operators driving an evolution.
//!
//! The [`Seeder`] and [`Sampler`] are always problem specific and must be supplied. Selection,
//! recombination and mutation fall back to built-ins when not supplied (see
//! [`Selector`](super::Selector), [`Crossover`](super::Crossover) and the mutagens).

use super::{PopulationSnapshot, SelectionError};
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use std::future::Future;

/// Produces the initial genomes.
pub trait Seeder<G>: Send + Sync {
    fn seed(&self, population_size: usize, rng: &mut StdRng) -> Result<Vec<G>, anyhow::Error>;
}

impl<G, F> Seeder<G> for F
where
    F: Fn(usize, &mut StdRng) -> Result<Vec<G>, anyhow::Error> + Send + Sync,
{
    fn seed(&self, population_size: usize, rng: &mut StdRng) -> Result<Vec<G>, anyhow::Error> {
        (self)(population_size, rng)
    }
}

/// Draws one noisy fitness sample for a genome. Higher is better.
///
/// Samplers are called repeatedly and concurrently for different genomes, but never more than
/// once at a time for the same chromosome. An in-flight call may be dropped at any await point
/// when its chromosome is retired. Non-finite samples are discarded.
pub trait Sampler<G>: Send + Sync + 'static {
    fn sample<'a>(&'a self, genome: &'a G) -> BoxFuture<'a, Result<f64, anyhow::Error>>;
}

impl<G, F, Fut> Sampler<G> for F
where
    G: Clone,
    F: Fn(G) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<f64, anyhow::Error>> + Send + 'static,
{
    fn sample<'a>(&'a self, genome: &'a G) -> BoxFuture<'a, Result<f64, anyhow::Error>> {
        Box::pin((self)(genome.clone()))
    }
}

/// Picks parents, as indices into the snapshot's sorted members.
pub trait Selection<G>: Send + Sync {
    fn select(
        &self,
        population: &PopulationSnapshot<G>,
        num_parents: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<usize>, SelectionError>;
}

/// Combines two parents into one offspring genome.
pub trait Recombination<G>: Send + Sync {
    fn recombine(&self, lhs: &G, rhs: &G, rng: &mut StdRng) -> Result<G, anyhow::Error>;
}

/// Perturbs an offspring genome.
///
/// `progress` is the run progress in `[0.0, 1.0]` (always `0.0` for unbounded runs), which
/// lets mutations anneal their strength over time.
pub trait Mutation<G>: Send + Sync {
    fn mutate(&self, genome: G, progress: f64, rng: &mut StdRng) -> Result<G, anyhow::Error>;
}

/// Recombination that clones the first parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneParent;

impl<G: Clone + Send + Sync> Recombination<G> for CloneParent {
    fn recombine(&self, lhs: &G, _rhs: &G, _rng: &mut StdRng) -> Result<G, anyhow::Error> {
        Ok(lhs.clone())
    }
}

/// Mutation that leaves the genome unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<G: Send + Sync> Mutation<G> for Identity {
    fn mutate(&self, genome: G, _progress: f64, _rng: &mut StdRng) -> Result<G, anyhow::Error> {
        Ok(genome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[tokio::test]
    async fn it_samples_with_closures() {
        let sampler = |genome: Vec<f64>| async move { Ok(genome.iter().sum::<f64>()) };

        let fitness = sampler.sample(&vec![1.0, 2.0, 3.5]).await.unwrap();

        assert_eq!(fitness, 6.5);
    }

    #[test]
    fn it_seeds_with_closures() {
        let seeder = |n: usize, _rng: &mut StdRng| -> Result<Vec<u8>, anyhow::Error> {
            Ok((0..n as u8).collect())
        };
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(seeder.seed(3, &mut rng).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn it_clones_the_first_parent() {
        let mut rng = StdRng::seed_from_u64(1);

        let child = CloneParent.recombine(&'a', &'b', &mut rng).unwrap();

        assert_eq!(child, 'a');
        assert_eq!(Identity.mutate(child, 0.5, &mut rng).unwrap(), 'a');
    }
}
