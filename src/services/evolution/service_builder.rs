use super::Evolver;
use super::estimator::EstimatorSettings;
use super::events::Publisher;
use crate::bootstrap::Configuration;
use crate::builder::{Set, Unset};
use crate::models::{
    BoundaryPredicate, CloneParent, FitnessEstimate, Identity, Mutation, PopulationSnapshot,
    Recombination, Sampler, Seeder, Selection, Selector,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::instrument;

pub type SeederSlot<G> = Box<dyn Seeder<G>>;
pub type SamplerSlot<G> = Arc<dyn Sampler<G>>;
pub type ConvergencePredicate<G> = Box<dyn Fn(&PopulationSnapshot<G>) -> bool + Send + Sync>;
pub type GenomeEquality<G> = Box<dyn Fn(&G, &G) -> bool + Send + Sync>;

/// Assembles an [`Evolver`]. A seeder and a sampler are required; everything else defaults to
/// the built-ins: tournaments of two, cloning the first parent, and no mutation.
pub struct EvolverBuilder<G, S = Unset<SeederSlot<G>>, P = Unset<SamplerSlot<G>>> {
    pub(super) config: Configuration,
    pub(super) seeder: S,
    pub(super) sampler: P,
    pub(super) selection: Box<dyn Selection<G>>,
    pub(super) recombination: Box<dyn Recombination<G>>,
    pub(super) mutation: Box<dyn Mutation<G>>,
    pub(super) boundary: Option<BoundaryPredicate>,
    pub(super) convergence: Option<ConvergencePredicate<G>>,
    pub(super) equality: Option<GenomeEquality<G>>,
}

impl<G> EvolverBuilder<G>
where
    G: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(config: Configuration) -> Self {
        Self {
            config,
            seeder: Unset::new(),
            sampler: Unset::new(),
            selection: Box::new(Selector::default()),
            recombination: Box::new(CloneParent),
            mutation: Box::new(Identity),
            boundary: None,
            convergence: None,
            equality: None,
        }
    }
}

impl<G, P> EvolverBuilder<G, Unset<SeederSlot<G>>, P> {
    pub fn with_seeder(
        self,
        seeder: impl Seeder<G> + 'static,
    ) -> EvolverBuilder<G, Set<SeederSlot<G>>, P> {
        let seeder: SeederSlot<G> = Box::new(seeder);

        EvolverBuilder {
            config: self.config,
            seeder: Set::new(seeder),
            sampler: self.sampler,
            selection: self.selection,
            recombination: self.recombination,
            mutation: self.mutation,
            boundary: self.boundary,
            convergence: self.convergence,
            equality: self.equality,
        }
    }
}

impl<G, S> EvolverBuilder<G, S, Unset<SamplerSlot<G>>> {
    pub fn with_sampler(
        self,
        sampler: impl Sampler<G>,
    ) -> EvolverBuilder<G, S, Set<SamplerSlot<G>>> {
        let sampler: SamplerSlot<G> = Arc::new(sampler);

        EvolverBuilder {
            config: self.config,
            seeder: self.seeder,
            sampler: Set::new(sampler),
            selection: self.selection,
            recombination: self.recombination,
            mutation: self.mutation,
            boundary: self.boundary,
            convergence: self.convergence,
            equality: self.equality,
        }
    }
}

impl<G, S, P> EvolverBuilder<G, S, P> {
    pub fn with_selection(mut self, selection: impl Selection<G> + 'static) -> Self {
        self.selection = Box::new(selection);
        self
    }

    pub fn with_recombination(mut self, recombination: impl Recombination<G> + 'static) -> Self {
        self.recombination = Box::new(recombination);
        self
    }

    pub fn with_mutation(mut self, mutation: impl Mutation<G> + 'static) -> Self {
        self.mutation = Box::new(mutation);
        self
    }

    /// Replaces the default maturity check that ends a generation.
    /// `max_generation_duration_ms` still applies.
    pub fn with_boundary(
        mut self,
        boundary: impl Fn(&[FitnessEstimate]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.boundary = Some(Box::new(boundary));
        self
    }

    /// Stops the run once the predicate holds for a yielded snapshot.
    pub fn with_convergence(
        mut self,
        convergence: impl Fn(&PopulationSnapshot<G>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.convergence = Some(Box::new(convergence));
        self
    }

    /// Lets offspring identical to one of their parents take over that parent's chromosome,
    /// estimate included, instead of starting from scratch.
    pub fn with_equality(
        mut self,
        equality: impl Fn(&G, &G) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.equality = Some(Box::new(equality));
        self
    }
}

impl<G> EvolverBuilder<G, Set<SeederSlot<G>>, Set<SamplerSlot<G>>>
where
    G: Send + Sync + 'static,
{
    #[instrument(level = "debug", skip(self), fields(population_size = self.config.population_size, rng_seed = ?self.config.rng_seed))]
    pub fn build(self) -> Evolver<G> {
        let rng = match self.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let publisher = Publisher::new();
        let wake = Arc::new(Notify::new());
        let settings = EstimatorSettings {
            consecutive_failure_threshold: self.config.consecutive_failure_threshold,
            estimate_mode: self.config.estimate_mode,
            wake: Arc::clone(&wake),
            publisher: publisher.clone(),
        };

        Evolver {
            schedule: self.config.schedule(),
            termination: self.config.termination(),
            config: self.config,
            seeder: self.seeder.into_inner(),
            sampler: self.sampler.into_inner(),
            selection: self.selection,
            recombination: self.recombination,
            mutation: self.mutation,
            boundary: self.boundary,
            convergence: self.convergence,
            equality: self.equality,
            settings,
            wake,
            publisher,
            rng,
            state: super::State::Seeding,
            phase: super::service::Phase::Unseeded,
            generations_yielded: 0,
            last_best: None,
            pending: None,
            started_at: None,
        }
    }
}
