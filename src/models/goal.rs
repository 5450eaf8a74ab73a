use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conclusion {
    /// The goal was reached: target fitness or a convergence predicate.
    Completed,
    /// A budget ran out: generations or wall-clock time.
    Terminated,
    /// An unrecoverable error ended the run.
    Failed,
}

/// Stop conditions checked before every generation. Without any, a run is infinite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Termination {
    pub max_generations: Option<u32>,
    /// Stop once the best mean fitness reaches or exceeds this value.
    pub target_fitness: Option<f64>,
    pub max_run_duration: Option<Duration>,
}

impl Termination {
    /// Checks whether the run should stop before producing another generation.
    #[instrument(level = "debug", skip(self), fields(termination = ?self))]
    pub(crate) fn check(
        &self,
        generations_yielded: u32,
        best_mean: Option<f64>,
        elapsed: Duration,
    ) -> Option<Conclusion> {
        if let (Some(target), Some(best)) = (self.target_fitness, best_mean) {
            if best >= target {
                return Some(Conclusion::Completed);
            }
        }

        if self
            .max_generations
            .is_some_and(|max| generations_yielded >= max)
        {
            return Some(Conclusion::Terminated);
        }

        if self.max_run_duration.is_some_and(|max| elapsed >= max) {
            return Some(Conclusion::Terminated);
        }

        None
    }

    /// Run progress from 0.0 to 1.0, used to decay mutation strength.
    /// Unbounded runs make no progress.
    pub(crate) fn progress(&self, generation: u32, elapsed: Duration) -> f64 {
        let by_generation = self
            .max_generations
            .filter(|max| *max > 0)
            .map(|max| generation as f64 / max as f64);
        let by_time = self
            .max_run_duration
            .filter(|max| !max.is_zero())
            .map(|max| elapsed.as_secs_f64() / max.as_secs_f64());

        by_generation
            .into_iter()
            .chain(by_time)
            .fold(0.0_f64, f64::max)
            .clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_runs_never_stop() {
        let termination = Termination::default();

        assert_eq!(
            termination.check(u32::MAX, Some(f64::MAX), Duration::MAX),
            None
        );
        assert_eq!(termination.progress(1000, Duration::from_secs(1000)), 0.0);
    }

    #[test]
    fn test_max_generations() {
        let termination = Termination {
            max_generations: Some(5),
            ..Default::default()
        };

        assert_eq!(termination.check(4, None, Duration::ZERO), None);
        assert_eq!(
            termination.check(5, None, Duration::ZERO),
            Some(Conclusion::Terminated)
        );
    }

    #[test]
    fn test_target_fitness_is_reached() {
        let termination = Termination {
            target_fitness: Some(0.5),
            ..Default::default()
        };

        assert_eq!(termination.check(1, Some(0.3), Duration::ZERO), None); // Below target
        assert_eq!(termination.check(1, None, Duration::ZERO), None); // No estimate yet
        assert_eq!(
            termination.check(1, Some(0.5), Duration::ZERO),
            Some(Conclusion::Completed)
        );
    }

    #[test]
    fn test_target_fitness_wins_over_budget() {
        let termination = Termination {
            max_generations: Some(3),
            target_fitness: Some(1.0),
            ..Default::default()
        };

        assert_eq!(
            termination.check(3, Some(2.0), Duration::ZERO),
            Some(Conclusion::Completed)
        );
    }

    #[test]
    fn test_max_run_duration() {
        let termination = Termination {
            max_run_duration: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        assert_eq!(termination.check(100, None, Duration::from_secs(9)), None);
        assert_eq!(
            termination.check(0, None, Duration::from_secs(10)),
            Some(Conclusion::Terminated)
        );
    }

    #[test]
    fn test_progress_takes_the_furthest_budget() {
        let termination = Termination {
            max_generations: Some(10),
            max_run_duration: Some(Duration::from_secs(100)),
            ..Default::default()
        };

        assert_eq!(termination.progress(2, Duration::from_secs(50)), 0.5);
        assert_eq!(termination.progress(8, Duration::from_secs(50)), 0.8);
        assert_eq!(termination.progress(20, Duration::ZERO), 1.0);
    }
}
