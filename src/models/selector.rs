//! Parent selection strategies.
//!
//! Selection works on a [`PopulationSnapshot`]: members sorted best first with a frozen copy
//! of their current fitness estimates. Estimates are noisy and of uneven confidence, so a
//! member's rank can change between snapshots as more samples arrive.
//!
//! # Selection Methods
//!
//! ## Tournament Selection
//!
//! Runs competitions between randomly chosen members and picks the best ranked one from each.
//! Only the ranking matters, so it is robust to fitness scaling and outliers in the noise.
//!
//! - **Size 2-3**: Balanced exploration and exploitation
//! - **Size 4-5**: Moderate selection pressure
//! - **Size 6+**: High pressure, risk of locking in lucky early estimates
//!
//! A tournament larger than the population uses the whole population.
//!
//! ## Roulette Wheel Selection
//!
//! Picks members with probability proportional to their mean fitness. Negative means are
//! shifted so the worst sampled member weighs zero. Members without samples never win.
//!
//! ## Truncation Selection
//!
//! Picks uniformly among the top `fraction` of the ranking. Strong pressure, simple to
//! reason about.
//!
//! # Examples
//!
//! ```rust
//! use async_ga::models::Selector;
//!
//! let tournament = Selector::tournament(3)?;
//! let roulette = Selector::roulette();
//! let truncation = Selector::truncation(0.5)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use super::{Individual, PopulationSnapshot, Selection};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Performs a single roulette wheel spin to select a candidate index.
fn spin_roulette(
    weights: &[f64],
    total_weight: f64,
    rng: &mut impl rand::Rng,
) -> Result<usize, SelectionError> {
    let spin = rng.random_range(0.0..total_weight);
    let mut cumulative = 0.0;

    for (index, weight) in weights.iter().enumerate() {
        cumulative += weight;
        // Strict, so zero weights are never picked
        if cumulative > spin {
            return Ok(index);
        }
    }

    Err(SelectionError::RouletteSelectionFailed)
}


/// Selects parents using fitness-proportionate roulette wheel selection.
#[instrument(level = "debug", skip(members, rng), fields(num_parents = num_parents, num_members = members.len()))]
fn roulette_selection<G>(
    num_parents: usize,
    members: &[Individual<G>],
    rng: &mut impl rand::Rng,
) -> Result<Vec<usize>, SelectionError> {
    let means: Vec<Option<f64>> = members.iter().map(|member| member.estimate.mean()).collect();

    let min_mean = means
        .iter()
        .flatten()
        .copied()
        .min_by(|a, b| a.total_cmp(b))
        .ok_or(SelectionError::NoValidParents)?;

    // Figure out how much, if anything, it needs to be shifted
    let shift = if min_mean < 0.0 { -min_mean } else { 0.0 };

    let weights: Vec<f64> = means
        .iter()
        .map(|mean| mean.map_or(0.0, |mean| mean + shift))
        .collect();

    let total_weight: f64 = weights.iter().sum();

    if !(total_weight > 0.0 && total_weight.is_finite()) {
        return Err(SelectionError::InvalidFitnessForRoulette);
    }

    (0..num_parents)
        .map(|_| spin_roulette(&weights, total_weight, rng))
        .collect()
}

/// Selects parents by running one tournament of `tournament_size` members per parent.
#[instrument(level = "debug", skip(members, rng), fields(num_parents = num_parents, tournament_size = tournament_size, num_members = members.len()))]
fn tournament_selection<G>(
    num_parents: usize,
    tournament_size: usize,
    members: &[Individual<G>],
    rng: &mut impl rand::Rng,
) -> Result<Vec<usize>, SelectionError> {
    if tournament_size == 0 {
        return Err(SelectionError::InvalidTournamentSize(tournament_size));
    }
    if members.is_empty() {
        return Err(SelectionError::NoValidParents);
    }

    let size = tournament_size.min(members.len());
    let mut indices: Vec<usize> = (0..members.len()).collect();
    let mut parents = Vec::with_capacity(num_parents);

    for _ in 0..num_parents {
        let (contestants, _) = indices.partial_shuffle(rng, size);

        let mut winner = contestants[0];
        for &idx in contestants.iter() {
            if members[idx].estimate.rank(&members[winner].estimate).is_lt() {
                winner = idx;
            }
        }

        parents.push(winner);
    }

    Ok(parents)
}

/// Selects parents uniformly from the best `fraction` of the ranking.
#[instrument(level = "debug", skip(members, rng), fields(num_parents = num_parents, fraction = fraction, num_members = members.len()))]
fn truncation_selection<G>(
    num_parents: usize,
    fraction: f64,
    members: &[Individual<G>],
    rng: &mut impl rand::Rng,
) -> Result<Vec<usize>, SelectionError> {
    if members.is_empty() {
        return Err(SelectionError::NoValidParents);
    }

    // Members are sorted best first
    let keep = ((members.len() as f64 * fraction).ceil() as usize).clamp(1, members.len());

    Ok((0..num_parents)
        .map(|_| rng.random_range(0..keep))
        .collect())
}

/// Built-in parent selection.
///
/// # Examples
///
/// ```rust
/// use async_ga::models::Selector;
///
/// // Moderate selection pressure
/// let selector = Selector::tournament(3)?;
///
/// // Tournaments need at least one contestant
/// assert!(Selector::tournament(0).is_err());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub enum Selector {
    /// Tournament selection runs competitions between randomly selected members.
    ///
    /// Larger tournament sizes increase selection pressure, making it more likely that
    /// the best ranked members are selected.
    Tournament {
        /// Number of members that compete in each tournament. Must be at least 1.
        size: usize,
    },

    /// Roulette wheel selection chooses members with probability proportional to their
    /// mean fitness.
    ///
    /// **Requirements**: at least one member must have been sampled, and the shifted means
    /// must not all be zero.
    Roulette,

    /// Truncation selection picks uniformly among the top `fraction` of members.
    Truncation {
        /// Share of the ranking eligible for selection, in `(0.0, 1.0]`.
        fraction: f64,
    },
}

impl Default for Selector {
    fn default() -> Self {
        Self::Tournament { size: 2 }
    }
}

/// Errors that can occur during parent selection.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SelectionError {
    /// No members are available for selection, or none has been sampled yet when the
    /// method needs fitness values.
    #[error("No valid parents available for selection")]
    NoValidParents,

    /// Tournaments need at least one contestant.
    #[error("Tournament size must be at least 1, got {0}")]
    InvalidTournamentSize(usize),

    /// Truncation fraction outside `(0.0, 1.0]`.
    #[error("Truncation fraction must be in (0.0, 1.0], got {0}")]
    InvalidTruncationFraction(f64),

    /// Roulette selection cannot proceed because all shifted weights are zero or not finite.
    #[error("All candidates have zero weight for roulette selection")]
    InvalidFitnessForRoulette,

    /// Internal roulette wheel algorithm failure.
    #[error("Internal error: roulette wheel failed to select candidate")]
    RouletteSelectionFailed,

    /// Raised by caller supplied selection policies.
    #[error("Selection failed: {0}")]
    Other(String),
}

impl Selector {
    /// Creates a tournament selector with the specified tournament size.
    pub fn tournament(size: usize) -> Result<Self, SelectionError> {
        if size == 0 {
            return Err(SelectionError::InvalidTournamentSize(size));
        }

        Ok(Self::Tournament { size })
    }

    /// Creates a roulette wheel selector.
    pub fn roulette() -> Self {
        Self::Roulette
    }

    /// Creates a truncation selector keeping the best `fraction` of the ranking.
    pub fn truncation(fraction: f64) -> Result<Self, SelectionError> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(SelectionError::InvalidTruncationFraction(fraction));
        }

        Ok(Self::Truncation { fraction })
    }

    /// Checks parameters of a deserialized selector.
    pub fn validate(&self) -> Result<(), SelectionError> {
        match self {
            Self::Tournament { size } => Self::tournament(*size).map(|_| ()),
            Self::Roulette => Ok(()),
            Self::Truncation { fraction } => Self::truncation(*fraction).map(|_| ()),
        }
    }
}

impl<G> Selection<G> for Selector {
    #[instrument(level = "debug", skip(self, population, rng), fields(selector = ?self, generation = population.generation()))]
    fn select(
        &self,
        population: &PopulationSnapshot<G>,
        num_parents: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<usize>, SelectionError> {
        // Variants are public and deserializable, so parameters may bypass the constructors
        self.validate()?;
        let members = population.members();

        match self {
            Self::Tournament { size } => tournament_selection(num_parents, *size, members, rng),
            Self::Roulette => roulette_selection(num_parents, members, rng),
            Self::Truncation { fraction } => {
                truncation_selection(num_parents, *fraction, members, rng)
            }
        }
    }
}
