use super::Recombination;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Performs uniform crossover by selecting genes from each parent with the given probability.
#[instrument(level = "debug", skip(rng, lhs, rhs), fields(genome_length = lhs.len(), probability = probability))]
fn crossover_uniform<T: Clone, R: Rng>(
    rng: &mut R,
    lhs: &[T],
    rhs: &[T],
    probability: f64,
) -> Vec<T> {
    lhs.iter()
        .zip(rhs.iter())
        .map(|(lhs, rhs)| {
            if rng.random_bool(probability) {
                lhs.clone()
            } else {
                rhs.clone()
            }
        })
        .collect()
}

/// Performs single-point crossover at the specified cut point.
#[instrument(level = "debug", skip(lhs, rhs), fields(genome_length = lhs.len(), cut_point = point))]
fn crossover_single_point<T: Clone>(lhs: &[T], rhs: &[T], point: usize) -> Vec<T> {
    let mut genome = Vec::with_capacity(lhs.len());

    genome.extend_from_slice(&lhs[..point]); // First part from lhs
    genome.extend_from_slice(&rhs[point..]); // Second part from rhs
    genome
}

/// Crossover strategy for vector genomes.
///
/// Creates offspring by combining genes from two parents of the same length.
///
/// # Strategies
///
/// ## Uniform Crossover
/// Each gene position is independently taken from either parent. Good when genes are largely
/// independent of each other.
///
/// ## Single-Point Crossover
/// Takes genes before a random cut point from the first parent and the rest from the second.
/// Preserves contiguous segments, so use it when adjacent genes work together.
///
/// # Examples
///
/// ```rust
/// use async_ga::models::Crossover;
///
/// // Uniform crossover with 60% chance of selecting from first parent
/// let uniform = Crossover::uniform(0.6)?;
///
/// // Single-point crossover for preserving gene segments
/// let single_point = Crossover::single_point();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Crossover {
    /// Uniform crossover selects each gene from either parent with the given probability.
    ///
    /// - `probability = 0.0`: Always selects from second parent (creates clone)
    /// - `probability = 0.5`: Equal chance from either parent (maximum mixing)
    /// - `probability = 1.0`: Always selects from first parent (creates clone)
    Uniform {
        /// Probability of selecting each gene from the first parent (0.0 to 1.0)
        probability: f64,
    },
    /// Single-point crossover cuts genomes at a random point and swaps the tails.
    ///
    /// The cut point is drawn from `1..len` so both parents contribute. Genomes shorter than
    /// two genes are cloned from the first parent.
    SinglePoint,
}

/// Error returned when attempting to create uniform crossover with invalid probability.
#[derive(Debug, thiserror::Error)]
#[error("uniform crossover probability must be between 0.0 and 1.0, got {0}")]
pub struct ProbabilityOutOfRangeError(pub(crate) f64);

/// Parents of different lengths cannot be recombined gene by gene.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("parents must have equal length, got {lhs} and {rhs}")]
pub struct GenomeLengthMismatch {
    pub lhs: usize,
    pub rhs: usize,
}

impl Crossover {
    /// Creates a uniform crossover strategy with specified selection probability.
    pub fn uniform(probability: f64) -> Result<Self, ProbabilityOutOfRangeError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(ProbabilityOutOfRangeError(probability));
        }

        Ok(Self::Uniform { probability })
    }

    /// Creates a single-point crossover strategy.
    pub fn single_point() -> Self {
        Self::SinglePoint
    }

    /// Checks parameters of a deserialized crossover.
    pub fn validate(&self) -> Result<(), ProbabilityOutOfRangeError> {
        match self {
            Self::Uniform { probability } => Self::uniform(*probability).map(|_| ()),
            Self::SinglePoint => Ok(()),
        }
    }

    /// Applies the crossover operation to two parent genomes, producing a new genome.
    #[instrument(level = "debug", skip(self, rng, lhs, rhs), fields(crossover_type = ?self, genome_length = lhs.len()))]
    pub(crate) fn apply<T: Clone, R: Rng>(
        &self,
        rng: &mut R,
        lhs: &[T],
        rhs: &[T],
    ) -> Result<Vec<T>, GenomeLengthMismatch> {
        check_lengths(lhs, rhs)?;

        Ok(match self {
            Self::Uniform { probability } => crossover_uniform(rng, lhs, rhs, *probability),
            Self::SinglePoint if lhs.len() < 2 => lhs.to_vec(),
            Self::SinglePoint => {
                let point = rng.random_range(1..lhs.len()); // Cut point
                crossover_single_point(lhs, rhs, point)
            }
        })
    }
}

impl<T: Clone + Send + Sync> Recombination<Vec<T>> for Crossover {
    fn recombine(
        &self,
        lhs: &Vec<T>,
        rhs: &Vec<T>,
        rng: &mut StdRng,
    ) -> Result<Vec<T>, anyhow::Error> {
        self.validate()?;
        Ok(self.apply(rng, lhs, rhs)?)
    }
}

fn check_lengths<T>(lhs: &[T], rhs: &[T]) -> Result<(), GenomeLengthMismatch> {
    if lhs.len() != rhs.len() {
        return Err(GenomeLengthMismatch {
            lhs: lhs.len(),
            rhs: rhs.len(),
        });
    }
    Ok(())
}

/// Arithmetic crossover for numeric genomes: every gene is the average of both parents.
///
/// Integer genes whose average falls halfway between two integers are rounded up or down at
/// random, so offspring do not drift towards either end of the range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Arithmetic;

impl Recombination<Vec<f64>> for Arithmetic {
    fn recombine(
        &self,
        lhs: &Vec<f64>,
        rhs: &Vec<f64>,
        _rng: &mut StdRng,
    ) -> Result<Vec<f64>, anyhow::Error> {
        check_lengths(lhs, rhs)?;

        Ok(lhs
            .iter()
            .zip(rhs.iter())
            .map(|(lhs, rhs)| lhs / 2.0 + rhs / 2.0)
            .collect())
    }
}

impl Recombination<Vec<i64>> for Arithmetic {
    fn recombine(
        &self,
        lhs: &Vec<i64>,
        rhs: &Vec<i64>,
        rng: &mut StdRng,
    ) -> Result<Vec<i64>, anyhow::Error> {
        check_lengths(lhs, rhs)?;

        Ok(lhs
            .iter()
            .zip(rhs.iter())
            .map(|(&lhs, &rhs)| {
                let sum = lhs as i128 + rhs as i128;
                let half = sum.div_euclid(2);
                let rounded = if sum.rem_euclid(2) == 0 {
                    half
                } else {
                    half + i128::from(rng.random_bool(0.5))
                };
                // The average of two i64 values is always an i64
                rounded as i64
            })
            .collect())
    }
}
