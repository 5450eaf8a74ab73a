//! # Noisy Point Search
//!
//! Searches for a 3D point at a target distance from the origin when every distance
//! measurement is noisy and slow. Each gene is an integer step in `[0, 1000]`, decoded to a
//! coordinate in `[-2.0, 2.0]`.
//!
//! The sampler sleeps a few milliseconds and adds Gaussian noise to every measurement, so a
//! single sample says little about a point. Estimators keep measuring in the background while
//! the evolver waits for each generation's estimates to settle.
//!
//! Run with `cargo run --example noisy_point`.

use anyhow::Result;
use async_ga::{
    Configuration, EvolutionEvent, bootstrap,
    models::{Crossover, Decay, Mutagen, MutationRate, Selector, Temperature},
};
use futures::StreamExt;
use rand::{Rng, rngs::StdRng};
use rand_distr::{Distribution, Normal};
use std::time::Duration;

const STEPS: i64 = 1000;
const TARGET_DISTANCE: f64 = 1.5;

fn decode(gene: i64) -> f64 {
    -2.0 + 4.0 * gene as f64 / STEPS as f64
}

/// Higher is better, 1.0 at the target distance.
fn fitness(genes: &[i64]) -> f64 {
    let distance = genes
        .iter()
        .map(|&gene| decode(gene).powi(2))
        .sum::<f64>()
        .sqrt();

    1.0 / (1.0 + (distance - TARGET_DISTANCE).abs())
}

async fn measure(genes: Vec<i64>) -> Result<f64> {
    let latency = rand::rng().random_range(1..5);
    tokio::time::sleep(Duration::from_millis(latency)).await;

    let noise = Normal::new(0.0, 0.05)?.sample(&mut rand::rng());
    Ok(fitness(&genes) + noise)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to see the progress of the search
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = Configuration {
        population_size: 24,
        min_samples_per_chromosome: 4,
        max_standard_error: Some(0.02),
        max_generation_duration_ms: Some(500),
        max_generations: Some(40),
        mutation_rate: MutationRate::new(0.6, Decay::Linear { multiplier: 0.5 })?,
        elite_count: 2,
        target_fitness: Some(0.98),
        ..Default::default()
    };

    let evolver = bootstrap::<Vec<i64>>(config)?
        .with_seeder(|n: usize, rng: &mut StdRng| -> Result<Vec<Vec<i64>>> {
            Ok((0..n)
                .map(|_| (0..3).map(|_| rng.random_range(0..=STEPS)).collect())
                .collect())
        })
        .with_sampler(measure)
        .with_selection(Selector::tournament(3)?)
        .with_recombination(Crossover::uniform(0.5)?)
        .with_mutation(Mutagen::new(
            Temperature::new(0.3, Decay::Exponential {
                multiplier: 0.9,
                exponent: 2,
            })?,
            MutationRate::constant(0.5)?,
            0,
            STEPS,
        )?)
        .with_equality(|lhs: &Vec<i64>, rhs: &Vec<i64>| lhs == rhs)
        .build();

    // Sampler failures and the conclusion arrive out of band
    let mut events = evolver.subscribe();
    let _events_handle = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let EvolutionEvent::Concluded(concluded) = event {
                tracing::info!(
                    message = "Search concluded",
                    generations = concluded.generations,
                    conclusion = ?concluded.conclusion
                );
            }
        }
    });

    let mut generations = Box::pin(evolver.into_stream());
    while let Some(snapshot) = generations.next().await {
        let snapshot = snapshot?;

        if let Some(best) = snapshot.best() {
            let point: Vec<f64> = best.genome().iter().map(|&gene| decode(gene)).collect();
            tracing::info!(
                message = "Best point",
                generation = snapshot.generation(),
                point = ?point,
                mean = ?best.estimate().mean(),
                standard_error = ?best.estimate().standard_error(),
                samples = best.estimate().count()
            );
        }
    }

    Ok(())
}
