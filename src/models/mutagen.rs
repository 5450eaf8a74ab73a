use super::Mutation;
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

fn decay_linear(value: f64, progress: f64, multiplier: f64) -> f64 {
    value * (1.0 - progress * multiplier).max(0.0)
}

fn decay_exponential(value: f64, progress: f64, multiplier: f64, exponent: i32) -> f64 {
    value * (1.0 - progress * multiplier).max(0.0).powi(exponent)
}

// ============================================================
// Decay
// ============================================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decay {
    Constant,
    Linear { multiplier: f64 },
    Exponential { multiplier: f64, exponent: i32 },
}

impl Decay {
    fn apply(&self, value: f64, progress: f64) -> f64 {
        match self {
            Decay::Constant => value,
            Decay::Linear { multiplier } => decay_linear(value, progress, *multiplier),
            Decay::Exponential {
                multiplier,
                exponent,
            } => decay_exponential(value, progress, *multiplier, *exponent),
        }
    }
}

// ============================================================
// Temperature
// ============================================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    value: f64,
    decay: Decay,
}

#[derive(Debug, thiserror::Error)]
#[error("temperature must be between 0.0 and 1.0, got: {0}")]
pub struct TemperatureOutOfRange(f64);

impl Temperature {
    pub fn new(value: f64, decay: Decay) -> Result<Self, TemperatureOutOfRange> {
        let value = Self::validate(value)?;

        Ok(Self { value, decay })
    }

    pub fn constant(value: f64) -> Result<Self, TemperatureOutOfRange> {
        Self::new(value, Decay::Constant)
    }

    fn validate(value: f64) -> Result<f64, TemperatureOutOfRange> {
        if !(0.0..=1.0).contains(&value) {
            return Err(TemperatureOutOfRange(value));
        }

        Ok(value)
    }

    fn get(&self, progress: f64) -> f64 {
        self.decay.apply(self.value, progress)
    }
}

// ============================================================
// MutationRate
// ============================================================
/// Probability of mutating, optionally decaying as the run progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRate {
    value: f64,
    decay: Decay,
}

#[derive(Debug, thiserror::Error)]
#[error("mutation_rate must be between 0.0 and 1.0, got: {0}")]
pub struct MutationRateOutOfRange(f64);

impl Default for MutationRate {
    fn default() -> Self {
        Self {
            value: 0.1,
            decay: Decay::Constant,
        }
    }
}

impl MutationRate {
    pub fn new(value: f64, decay: Decay) -> Result<Self, MutationRateOutOfRange> {
        let value = Self::validate(value)?;

        Ok(Self { value, decay })
    }

    pub fn constant(value: f64) -> Result<Self, MutationRateOutOfRange> {
        Self::new(value, Decay::Constant)
    }

    fn validate(value: f64) -> Result<f64, MutationRateOutOfRange> {
        if !(0.0..=1.0).contains(&value) {
            return Err(MutationRateOutOfRange(value));
        }

        Ok(value)
    }

    /// Re-checks a rate that bypassed the constructors, e.g. through deserialization.
    pub(crate) fn validated(&self) -> Result<(), MutationRateOutOfRange> {
        Self::validate(self.value).map(|_| ())
    }

    /// Rate at the given run progress, always within `[0.0, 1.0]`.
    pub(crate) fn get(&self, progress: f64) -> f64 {
        self.decay.apply(self.value, progress).clamp(0.0, 1.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MutagenError {
    #[error("Mutation rate error: {0}")]
    MutationRate(#[from] MutationRateOutOfRange),
    #[error("Temperature error: {0}")]
    Temperature(#[from] TemperatureOutOfRange),
    #[error("Gene range is empty: lower={lower}, upper={upper}")]
    EmptyGeneRange { lower: i64, upper: i64 },
    #[error("Noise deviation must be finite and non-negative, got: {0}")]
    InvalidDeviation(f64),
}

// ============================================================
// Mutagen
// ============================================================
/// Step mutation for integer genomes whose genes share an inclusive range.
///
/// Each gene mutates with probability `mutation_rate`. Temperature controls the step size: at
/// `1.0` a gene can jump across its whole range, at `0.0` it moves by one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutagen {
    mutation_rate: MutationRate,
    temperature: Temperature,
    lower: i64,
    upper: i64,
}

impl Mutagen {
    pub fn new(
        temperature: Temperature,
        mutation_rate: MutationRate,
        lower: i64,
        upper: i64,
    ) -> Result<Self, MutagenError> {
        if lower > upper {
            return Err(MutagenError::EmptyGeneRange { lower, upper });
        }

        Ok(Self {
            temperature,
            mutation_rate,
            lower,
            upper,
        })
    }

    pub fn constant(
        temperature_value: f64,
        mutation_rate_value: f64,
        lower: i64,
        upper: i64,
    ) -> Result<Self, MutagenError> {
        let temperature = Temperature::constant(temperature_value)?;
        let mutation_rate = MutationRate::constant(mutation_rate_value)?;

        Self::new(temperature, mutation_rate, lower, upper)
    }

    fn steps(&self) -> i64 {
        self.upper - self.lower + 1
    }

    fn mutate_genes<R: Rng>(&self, rng: &mut R, genome: &mut [i64], progress: f64) {
        let temperature = self.temperature.get(progress);
        let mutation_rate = self.mutation_rate.get(progress);

        for gene in genome.iter_mut() {
            // Should we mutate this gene?
            if rng.random_range(0.0..1.0) < mutation_rate {
                // Temperature controls mutation step: higher = larger jumps
                let max_step = (1.0 + (self.steps() as f64 * temperature)) as i64;

                let direction = if rng.random_bool(0.5) { 1 } else { -1 };
                let step = rng.random_range(1..=max_step);

                *gene = (*gene + direction * step).clamp(self.lower, self.upper);
            }
        }
    }
}

impl Mutation<Vec<i64>> for Mutagen {
    fn mutate(
        &self,
        mut genome: Vec<i64>,
        progress: f64,
        rng: &mut StdRng,
    ) -> Result<Vec<i64>, anyhow::Error> {
        self.mutate_genes(rng, &mut genome, progress);
        Ok(genome)
    }
}

// ============================================================
// Noise
// ============================================================
/// Gaussian noise for real-valued genomes.
///
/// Each gene mutates with probability `mutation_rate` by adding a sample of
/// `N(0, deviation * temperature)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Noise {
    deviation: f64,
    mutation_rate: MutationRate,
    temperature: Temperature,
}

impl Noise {
    pub fn new(
        deviation: f64,
        mutation_rate: MutationRate,
        temperature: Temperature,
    ) -> Result<Self, MutagenError> {
        if !(deviation.is_finite() && deviation >= 0.0) {
            return Err(MutagenError::InvalidDeviation(deviation));
        }

        Ok(Self {
            deviation,
            mutation_rate,
            temperature,
        })
    }

    /// Noise that touches every gene with a fixed deviation.
    pub fn constant(deviation: f64) -> Result<Self, MutagenError> {
        Self::new(
            deviation,
            MutationRate::constant(1.0)?,
            Temperature::constant(1.0)?,
        )
    }
}

impl Mutation<Vec<f64>> for Noise {
    fn mutate(
        &self,
        mut genome: Vec<f64>,
        progress: f64,
        rng: &mut StdRng,
    ) -> Result<Vec<f64>, anyhow::Error> {
        let deviation = self.deviation * self.temperature.get(progress);
        let mutation_rate = self.mutation_rate.get(progress);
        let normal = Normal::new(0.0, deviation)?;

        for gene in genome.iter_mut() {
            if rng.random_bool(mutation_rate) {
                *gene += normal.sample(rng);
            }
        }

        Ok(genome)
    }
}

// ============================================================
// Swap
// ============================================================
/// Swaps two randomly chosen genes. Keeps permutations valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Swap;

impl<T: Send + Sync> Mutation<Vec<T>> for Swap {
    fn mutate(
        &self,
        mut genome: Vec<T>,
        _progress: f64,
        rng: &mut StdRng,
    ) -> Result<Vec<T>, anyhow::Error> {
        if genome.len() >= 2 {
            let a = rng.random_range(0..genome.len());
            let b = rng.random_range(0..genome.len());
            genome.swap(a, b);
        }

        Ok(genome)
    }
}
