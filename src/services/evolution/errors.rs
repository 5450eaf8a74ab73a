use crate::models::SelectionError;

/// Errors that end an evolution run.
///
/// Sampler failures are not among them: they stay local to their estimator and are reported
/// through [`EvolutionEvent`](super::EvolutionEvent)s instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("SeedError: {0}")]
    SeedError(anyhow::Error),
    #[error("SeedCountMismatch: expected={expected}, got={got}")]
    SeedCountMismatch { expected: usize, got: usize },
    #[error("SelectionError: {0}")]
    SelectionError(#[from] SelectionError),
    #[error("InvalidSelection: expected={expected} parents, got={got}")]
    InvalidSelection { expected: usize, got: usize },
    #[error("InvalidParentIndex: index={index}, population_size={population_size}")]
    InvalidParentIndex { index: usize, population_size: usize },
    #[error("RecombinationError: {0}")]
    RecombinationError(anyhow::Error),
    #[error("MutationError: {0}")]
    MutationError(anyhow::Error),
    #[error("AllEstimatorsFailed: generation={generation}")]
    AllEstimatorsFailed { generation: u32 },
}
