use super::FitnessEstimate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of the estimator attached to a chromosome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EstimatorStatus {
    /// Still sampling.
    #[default]
    Running,
    /// Stopped on request. The estimate is kept as it was.
    Cancelled,
    /// Gave up after too many consecutive sampler failures. The estimate is frozen.
    Failed { failures: u32 },
    /// The estimator task ended unexpectedly (panicked or was aborted).
    Aborted,
}

impl EstimatorStatus {
    /// Whether the estimate can no longer change for reasons other than cancellation.
    pub fn is_frozen(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Aborted)
    }
}

/// What an estimator publishes after every change: its estimate and its status.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Estimation {
    pub estimate: FitnessEstimate,
    pub status: EstimatorStatus,
}

/// Value copy of one chromosome at the moment a snapshot was taken.
#[derive(Debug)]
pub struct Individual<G> {
    pub(crate) chromosome_id: Uuid,
    pub(crate) genome: Arc<G>,
    pub(crate) estimate: FitnessEstimate,
    pub(crate) status: EstimatorStatus,
    pub(crate) generation_born: u32,
}

impl<G> Clone for Individual<G> {
    fn clone(&self) -> Self {
        Self {
            chromosome_id: self.chromosome_id,
            genome: Arc::clone(&self.genome),
            estimate: self.estimate,
            status: self.status,
            generation_born: self.generation_born,
        }
    }
}

impl<G> Individual<G> {
    pub fn chromosome_id(&self) -> Uuid {
        self.chromosome_id
    }

    pub fn genome(&self) -> &G {
        &self.genome
    }

    pub fn estimate(&self) -> &FitnessEstimate {
        &self.estimate
    }

    pub fn status(&self) -> EstimatorStatus {
        self.status
    }

    /// Generation in which the chromosome was created. Carried chromosomes keep theirs.
    pub fn generation_born(&self) -> u32 {
        self.generation_born
    }
}
