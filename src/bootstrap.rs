use crate::models::{
    EstimateMode, MutationRate, MutationRateOutOfRange, Schedule, Termination,
};
use crate::services::evolution::EvolverBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

/// Tunables of an evolution run.
///
/// Every field has a default, so a JSON document only needs the fields it changes:
///
/// ```rust
/// use async_ga::Configuration;
///
/// let config = Configuration::from_json(r#"{ "population_size": 20, "max_generations": 50 }"#)?;
///
/// assert_eq!(config.population_size, 20);
/// assert_eq!(config.min_samples_per_chromosome, 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Number of chromosomes in every generation.
    pub population_size: usize,
    /// Samples every chromosome needs before a generation may end.
    pub min_samples_per_chromosome: u64,
    /// Upper bound on how long a generation is estimated, mature or not.
    pub max_generation_duration_ms: Option<u64>,
    /// Stop after yielding this many generations. Unbounded when absent.
    pub max_generations: Option<u32>,
    /// Probability that an offspring is mutated.
    pub mutation_rate: MutationRate,
    /// Consecutive sampler failures after which an estimator gives up.
    pub consecutive_failure_threshold: u32,
    /// Best ranked chromosomes carried into the next generation unchanged.
    pub elite_count: usize,
    pub estimate_mode: EstimateMode,
    /// Also require this standard error of the mean before a generation may end.
    pub max_standard_error: Option<f64>,
    /// Stop once the best mean fitness reaches this value.
    pub target_fitness: Option<f64>,
    /// Stop once the run has lasted this long.
    pub max_run_duration_ms: Option<u64>,
    /// Seed for reproducible selection and variation. Sampling noise is not covered.
    pub rng_seed: Option<u64>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            population_size: 10,
            min_samples_per_chromosome: 1,
            max_generation_duration_ms: None,
            max_generations: None,
            mutation_rate: MutationRate::default(),
            consecutive_failure_threshold: 3,
            elite_count: 0,
            estimate_mode: EstimateMode::default(),
            max_standard_error: None,
            target_fitness: None,
            max_run_duration_ms: None,
            rng_seed: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("population_size must be at least 1")]
    EmptyPopulation,
    #[error("elite_count must not exceed population_size: elite_count={elite_count}, population_size={population_size}")]
    TooManyElites {
        elite_count: usize,
        population_size: usize,
    },
    #[error("consecutive_failure_threshold must be at least 1")]
    ZeroFailureThreshold,
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },
    #[error("max_standard_error must be finite and non-negative, got: {0}")]
    InvalidStandardError(f64),
    #[error("target_fitness must be finite, got: {0}")]
    InvalidTargetFitness(f64),
    #[error("moving average alpha must be in (0.0, 1.0], got: {0}")]
    InvalidSmoothingFactor(f64),
    #[error("Mutation rate error: {0}")]
    MutationRate(#[from] MutationRateOutOfRange),
    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl Configuration {
    pub fn new(population_size: usize) -> Self {
        Self {
            population_size,
            ..Default::default()
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigurationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[instrument(level = "debug", skip(self), fields(population_size = self.population_size))]
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.population_size == 0 {
            return Err(ConfigurationError::EmptyPopulation);
        }

        if self.elite_count > self.population_size {
            return Err(ConfigurationError::TooManyElites {
                elite_count: self.elite_count,
                population_size: self.population_size,
            });
        }

        if self.consecutive_failure_threshold == 0 {
            return Err(ConfigurationError::ZeroFailureThreshold);
        }

        if self.max_generation_duration_ms == Some(0) {
            return Err(ConfigurationError::ZeroDuration {
                name: "max_generation_duration_ms",
            });
        }

        if self.max_run_duration_ms == Some(0) {
            return Err(ConfigurationError::ZeroDuration {
                name: "max_run_duration_ms",
            });
        }

        if let Some(se) = self.max_standard_error {
            if !(se.is_finite() && se >= 0.0) {
                return Err(ConfigurationError::InvalidStandardError(se));
            }
        }

        if let Some(target) = self.target_fitness {
            if !target.is_finite() {
                return Err(ConfigurationError::InvalidTargetFitness(target));
            }
        }

        if let EstimateMode::Moving { alpha } = self.estimate_mode {
            EstimateMode::moving(alpha)
                .map_err(|_| ConfigurationError::InvalidSmoothingFactor(alpha))?;
        }

        self.mutation_rate.validated()?;

        Ok(())
    }

    pub(crate) fn schedule(&self) -> Schedule {
        Schedule {
            min_samples_per_chromosome: self.min_samples_per_chromosome,
            max_standard_error: self.max_standard_error,
            max_generation_duration: self.max_generation_duration_ms.map(Duration::from_millis),
        }
    }

    pub(crate) fn termination(&self) -> Termination {
        Termination {
            max_generations: self.max_generations,
            target_fitness: self.target_fitness,
            max_run_duration: self.max_run_duration_ms.map(Duration::from_millis),
        }
    }
}

/// Validates the configuration and returns a builder awaiting a seeder and a sampler.
///
/// ```rust
/// use async_ga::{Configuration, bootstrap};
/// use rand::{Rng, rngs::StdRng};
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = Configuration {
///     max_generations: Some(3),
///     ..Configuration::new(8)
/// };
///
/// let best = bootstrap::<f64>(config)?
///     .with_seeder(|n: usize, rng: &mut StdRng| -> anyhow::Result<Vec<f64>> {
///         Ok((0..n).map(|_| rng.random_range(-10.0..10.0)).collect())
///     })
///     .with_sampler(|x: f64| async move { Ok::<f64, anyhow::Error>(-x * x) })
///     .build()
///     .run()
///     .await?;
/// # let _ = best;
/// # Ok(())
/// # }
/// ```
#[instrument(level = "debug", skip(config), fields(population_size = config.population_size))]
pub fn bootstrap<G>(
    config: Configuration,
) -> Result<EvolverBuilder<G>, ConfigurationError>
where
    G: Clone + Send + Sync + 'static,
{
    config.validate()?;

    Ok(EvolverBuilder::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Decay;

    #[test]
    fn it_applies_defaults() {
        let config = Configuration::from_json("{}").unwrap();

        assert_eq!(config, Configuration::default());
        assert_eq!(config.population_size, 10);
        assert_eq!(config.consecutive_failure_threshold, 3);
        assert_eq!(config.mutation_rate, MutationRate::constant(0.1).unwrap());
        assert_eq!(config.estimate_mode, EstimateMode::Cumulative);
        assert_eq!(config.max_generations, None);
    }

    #[test]
    fn it_parses_every_field() {
        let config = Configuration::from_json(
            r#"{
                "population_size": 4,
                "min_samples_per_chromosome": 5,
                "max_generation_duration_ms": 250,
                "max_generations": 7,
                "mutation_rate": { "value": 0.5, "decay": { "Linear": { "multiplier": 1.0 } } },
                "consecutive_failure_threshold": 2,
                "elite_count": 1,
                "estimate_mode": { "Moving": { "alpha": 0.3 } },
                "max_standard_error": 0.05,
                "target_fitness": 100.0,
                "max_run_duration_ms": 60000,
                "rng_seed": 42
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.mutation_rate,
            MutationRate::new(0.5, Decay::Linear { multiplier: 1.0 }).unwrap()
        );
        assert_eq!(config.estimate_mode, EstimateMode::Moving { alpha: 0.3 });
        assert_eq!(
            config.schedule().max_generation_duration,
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.termination().max_generations, Some(7));
        assert_eq!(config.rng_seed, Some(42));
    }

    #[test]
    fn it_round_trips_through_json() {
        let config = Configuration {
            elite_count: 2,
            max_standard_error: Some(0.1),
            ..Configuration::new(6)
        };

        let parsed = Configuration::from_json(&config.to_json().unwrap()).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn it_rejects_invalid_values() {
        let invalid = [
            r#"{ "population_size": 0 }"#,
            r#"{ "population_size": 2, "elite_count": 3 }"#,
            r#"{ "consecutive_failure_threshold": 0 }"#,
            r#"{ "max_generation_duration_ms": 0 }"#,
            r#"{ "max_run_duration_ms": 0 }"#,
            r#"{ "max_standard_error": -1.0 }"#,
            r#"{ "estimate_mode": { "Moving": { "alpha": 0.0 } } }"#,
            r#"{ "mutation_rate": { "value": 1.5, "decay": "Constant" } }"#,
            r#"{ "population_size": "ten" }"#,
        ];

        for json in invalid {
            assert!(Configuration::from_json(json).is_err(), "accepted {json}");
        }
    }

    #[test]
    fn it_refuses_to_bootstrap_invalid_configurations() {
        let config = Configuration::new(0);

        assert!(matches!(
            bootstrap::<u8>(config),
            Err(ConfigurationError::EmptyPopulation)
        ));
    }
}
