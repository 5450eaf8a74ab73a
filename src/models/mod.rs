mod crossover;
mod estimate;
mod goal;
mod individual;
mod mutagen;
mod operators;
mod population;
mod schedule;
mod selector;

pub use crossover::{Arithmetic, Crossover, GenomeLengthMismatch, ProbabilityOutOfRangeError};
pub use estimate::{EstimateMode, FitnessEstimate, InvalidSmoothingFactor};
pub use goal::{Conclusion, Termination};
pub use individual::{EstimatorStatus, Estimation, Individual};
pub use mutagen::{
    Decay, Mutagen, MutagenError, MutationRate, MutationRateOutOfRange, Noise, Swap, Temperature,
    TemperatureOutOfRange,
};
pub use operators::{CloneParent, Identity, Mutation, Recombination, Sampler, Seeder, Selection};
pub use population::PopulationSnapshot;
pub use schedule::{BoundaryPredicate, Schedule};
pub use selector::{SelectionError, Selector};

pub(crate) use schedule::ScheduleDecision;
