use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How an estimator folds new samples into a [`FitnessEstimate`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum EstimateMode {
    /// Every sample weighs the same (Welford's online mean and variance).
    #[default]
    Cumulative,
    /// Exponentially weighted mean and variance, biased towards recent samples.
    /// Use when the fitness itself drifts over time. `alpha` is in `(0.0, 1.0]`.
    Moving { alpha: f64 },
}

impl EstimateMode {
    pub fn moving(alpha: f64) -> Result<Self, InvalidSmoothingFactor> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(InvalidSmoothingFactor(alpha));
        }

        Ok(Self::Moving { alpha })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("moving average alpha must be in (0.0, 1.0], got {0}")]
pub struct InvalidSmoothingFactor(pub(crate) f64);

/// Online statistical summary of repeated noisy fitness samples.
///
/// A fresh estimate has `count == 0` and carries no mean or variance. Every accepted
/// sample is folded in O(1), so an estimate can absorb samples indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FitnessEstimate {
    pub(crate) mean: f64,
    pub(crate) variance: f64,
    pub(crate) count: u64,
    pub(crate) updated_at: Option<DateTime<Utc>>,
}

impl FitnessEstimate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Population variance (divides by `count`).
    pub fn variance(&self) -> Option<f64> {
        (self.count > 0).then_some(self.variance)
    }

    /// Unbiased variance (divides by `count - 1`). Needs at least two samples.
    pub fn sample_variance(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let n = self.count as f64;
        Some(self.variance * n / (n - 1.0))
    }

    /// Standard error of the mean.
    pub fn standard_error(&self) -> Option<f64> {
        self.sample_variance()
            .map(|variance| (variance / self.count as f64).sqrt())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Folds one sample into the running mean and variance.
    ///
    /// Non-finite samples are discarded and leave the estimate untouched, as are samples whose
    /// fold would overflow the mean or variance. Returns whether the sample was applied.
    pub fn update(&mut self, sample: f64) -> bool {
        if !sample.is_finite() {
            return false;
        }

        let n = (self.count + 1) as f64;
        let delta = sample - self.mean;
        let mean = self.mean + delta / n;
        // Welford, expressed on the population variance instead of M2
        let variance = self.variance + (delta * (sample - mean) - self.variance) / n;
        self.commit(mean, variance)
    }

    /// Folds one sample using an exponentially weighted moving mean and variance.
    pub fn update_weighted(&mut self, sample: f64, alpha: f64) -> bool {
        if !sample.is_finite() {
            return false;
        }

        if self.count == 0 {
            return self.commit(sample, 0.0);
        }

        let delta = sample - self.mean;
        let increment = alpha * delta;
        let mean = self.mean + increment;
        let variance = (1.0 - alpha) * (self.variance + delta * increment);
        self.commit(mean, variance)
    }

    pub(crate) fn apply(&mut self, sample: f64, mode: EstimateMode) -> bool {
        match mode {
            EstimateMode::Cumulative => self.update(sample),
            EstimateMode::Moving { alpha } => self.update_weighted(sample, alpha),
        }
    }

    fn commit(&mut self, mean: f64, variance: f64) -> bool {
        if !mean.is_finite() || !variance.is_finite() {
            return false;
        }

        self.mean = mean;
        self.variance = variance;
        self.count += 1;
        self.updated_at = Some(Utc::now());
        true
    }

    /// Ranking order: `Less` means `self` ranks ahead of `other`.
    ///
    /// Higher means rank first, ties go to the estimate backed by more samples, and an
    /// estimate without samples always ranks last.
    pub fn rank(&self, other: &Self) -> Ordering {
        match (self.count, other.count) {
            (0, 0) => Ordering::Equal,
            (0, _) => Ordering::Greater,
            (_, 0) => Ordering::Less,
            _ => other
                .mean
                .total_cmp(&self.mean)
                .then_with(|| other.count.cmp(&self.count)),
        }
    }
}
