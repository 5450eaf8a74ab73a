use super::{Estimation, FitnessEstimate};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

/// Custom generation boundary over the current estimates, replacing the maturity check.
pub type BoundaryPredicate = Box<dyn Fn(&[FitnessEstimate]) -> bool + Send + Sync>;

/// Controls when a generation has been estimated long enough to select from.
///
/// By default a generation ends once every chromosome that still samples is *mature*: it has
/// at least `min_samples_per_chromosome` samples and, if `max_standard_error` is set, a standard
/// error of the mean no larger than that. Frozen chromosomes are exempt. `max_generation_duration`
/// ends a generation regardless, selecting on whatever estimates exist.
///
/// # Examples
///
/// ```rust
/// use async_ga::models::Schedule;
/// use std::time::Duration;
///
/// // Select as soon as every chromosome has been sampled 5 times, but never wait over a second
/// let schedule = Schedule {
///     min_samples_per_chromosome: 5,
///     max_standard_error: None,
///     max_generation_duration: Some(Duration::from_secs(1)),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Schedule {
    pub min_samples_per_chromosome: u64,
    pub max_standard_error: Option<f64>,
    pub max_generation_duration: Option<Duration>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            min_samples_per_chromosome: 1,
            max_standard_error: None,
            max_generation_duration: None,
        }
    }
}

/// Decision about what to do with the current generation.
#[derive(Debug, PartialEq)]
pub enum ScheduleDecision {
    /// Keep estimating.
    Wait,
    /// Select from the current estimates. `forced` when the duration cap ended the wait.
    Select { forced: bool },
    /// Every estimator has given up, nothing will improve.
    Fail,
}

impl Schedule {
    fn is_mature(&self, estimate: &FitnessEstimate) -> bool {
        if estimate.count() < self.min_samples_per_chromosome {
            return false;
        }

        match self.max_standard_error {
            Some(max) => estimate.standard_error().is_some_and(|se| se <= max),
            None => true,
        }
    }

    /// Decides whether the generation boundary has been reached.
    #[instrument(level = "debug", skip(self, estimations, predicate), fields(num_chromosomes = estimations.len(), elapsed_ms = elapsed.as_millis()))]
    pub(crate) fn should_select(
        &self,
        estimations: &[Estimation],
        elapsed: Duration,
        predicate: Option<&BoundaryPredicate>,
    ) -> ScheduleDecision {
        if !estimations.is_empty()
            && estimations
                .iter()
                .all(|estimation| estimation.status.is_frozen())
        {
            return ScheduleDecision::Fail;
        }

        if self
            .max_generation_duration
            .is_some_and(|max| elapsed >= max)
        {
            return ScheduleDecision::Select { forced: true };
        }

        let ready = match predicate {
            Some(predicate) => {
                let estimates: Vec<FitnessEstimate> =
                    estimations.iter().map(|e| e.estimate).collect();
                predicate(&estimates)
            }
            None => estimations
                .iter()
                .filter(|estimation| !estimation.status.is_frozen())
                .all(|estimation| self.is_mature(&estimation.estimate)),
        };

        if ready {
            ScheduleDecision::Select { forced: false }
        } else {
            ScheduleDecision::Wait
        }
    }
}
