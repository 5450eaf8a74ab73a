mod chromosome;
mod errors;
mod estimator;
mod events;
mod service;
mod service_builder;

pub use chromosome::{Chromosome, Population};
pub use errors::Error;
pub use events::{
    ConcludedEvent, EstimatorFailedEvent, Event, EvolutionEvent, GenerationCompletedEvent,
    SampleFailedEvent,
};
pub use service::{Evolver, State};
pub use service_builder::{
    ConvergencePredicate, EvolverBuilder, GenomeEquality, SamplerSlot, SeederSlot,
};
