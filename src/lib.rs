//! Asynchronous genetic algorithm for noisy fitness functions.
//!
//! Each chromosome owns a background estimator that keeps sampling its fitness and refines a
//! running mean and variance. Selection reads whatever the estimates are when a generation ends,
//! so expensive or noisy evaluations overlap with breeding instead of blocking it.
//!
//! Start from [`bootstrap`], supply a [`Seeder`](models::Seeder) and a
//! [`Sampler`](models::Sampler), then pull generations from the [`Evolver`].

mod builder;

pub mod bootstrap;
pub mod models;
pub mod services;

pub use bootstrap::{Configuration, ConfigurationError, bootstrap};
pub use builder::{Set, Unset};
pub use services::evolution::{
    Chromosome, Error, EvolutionEvent, Evolver, EvolverBuilder, Population, State,
};
