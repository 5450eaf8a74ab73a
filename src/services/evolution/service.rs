use super::Error;
use super::chromosome::{Chromosome, Population};
use super::estimator::EstimatorSettings;
use super::events::{ConcludedEvent, EvolutionEvent, GenerationCompletedEvent, Publisher};
use super::service_builder::{ConvergencePredicate, GenomeEquality, SamplerSlot, SeederSlot};
use crate::bootstrap::Configuration;
use crate::models::{
    BoundaryPredicate, Conclusion, Mutation, PopulationSnapshot, Recombination, Schedule,
    ScheduleDecision, Selection, Termination,
};
use futures::Stream;
use rand::Rng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Lifecycle of an [`Evolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing has been pulled yet.
    Seeding,
    /// Generations are being produced.
    Running,
    /// Ended by a stop condition or by the caller. All estimators are cancelled.
    Stopped,
    /// Ended by an unrecoverable error. All estimators are cancelled.
    Failed,
}

/// Offspring genome and the snapshot indices of its parents.
struct Offspring<G> {
    genome: G,
    parents: [usize; 2],
}

/// The next generation, bred but not yet estimating.
pub(super) struct Staged<G> {
    generation: u32,
    /// Elites and parents taken over by identical offspring, estimators still running.
    carried: Vec<Chromosome<G>>,
    fresh: Vec<G>,
    /// Chromosomes leaving the population.
    retiring: Vec<Chromosome<G>>,
}

impl<G: Send + Sync + 'static> Staged<G> {
    async fn retire(&mut self) {
        futures::future::join_all(self.retiring.iter_mut().map(|chromosome| chromosome.retire()))
            .await;
    }

    async fn retire_all(&mut self) {
        futures::future::join_all(
            self.retiring
                .iter_mut()
                .chain(self.carried.iter_mut())
                .map(|chromosome| chromosome.retire()),
        )
        .await;
    }

    /// Starts estimators for the fresh genomes. Call only once the leaving chromosomes are
    /// retired.
    fn spawn(self, sampler: &SamplerSlot<G>, settings: &EstimatorSettings) -> Population<G> {
        let carried = self.carried.len();
        let retired = self.retiring.len();
        let spawned = self.fresh.len();

        let mut members = self.carried;
        members.extend(self.fresh.into_iter().map(|genome| {
            Chromosome::spawn(Arc::new(genome), self.generation, sampler, settings)
        }));

        tracing::debug!(
            message = "Population replaced",
            generation = self.generation,
            carried = carried,
            retired = retired,
            spawned = spawned
        );

        Population::new(self.generation, members)
    }
}

/// Position in the generation cycle.
///
/// Awaits only ever happen on state held here, so a pull dropped halfway resumes on the next
/// call instead of losing the population.
pub(super) enum Phase<G> {
    Unseeded,
    /// Waiting for the boundary of a population that has not been yielded.
    Estimating(Population<G>),
    /// The population was yielded. The next pull breeds from it.
    Yielded(Population<G>),
    /// The next generation is bred and the leaving chromosomes are being cancelled.
    Retiring(Staged<G>),
}

/// Pull-based genetic algorithm over noisy fitness.
///
/// Every call to [`next`](Self::next) produces one generation: chromosomes are estimated in the
/// background until the generation boundary holds, then a sorted snapshot is returned. The next
/// call selects parents from the latest estimates, breeds the following generation and waits for
/// its boundary in turn. Nothing happens between calls except background sampling, so a caller
/// that stops pulling stops the search; dropping the evolver cancels every estimator.
///
/// `next` is cancel safe. A call dropped before it completes, for example by a timeout, leaves
/// the run where it was and the following call carries on from there.
pub struct Evolver<G> {
    pub(super) config: Configuration,
    pub(super) schedule: Schedule,
    pub(super) termination: Termination,
    pub(super) seeder: SeederSlot<G>,
    pub(super) sampler: SamplerSlot<G>,
    pub(super) selection: Box<dyn Selection<G>>,
    pub(super) recombination: Box<dyn Recombination<G>>,
    pub(super) mutation: Box<dyn Mutation<G>>,
    pub(super) boundary: Option<BoundaryPredicate>,
    pub(super) convergence: Option<ConvergencePredicate<G>>,
    pub(super) equality: Option<GenomeEquality<G>>,
    pub(super) settings: EstimatorSettings,
    pub(super) wake: Arc<Notify>,
    pub(super) publisher: Publisher,
    pub(super) rng: StdRng,
    pub(super) state: State,
    pub(super) phase: Phase<G>,
    pub(super) generations_yielded: u32,
    pub(super) last_best: Option<f64>,
    /// Stop condition detected on the last yielded snapshot.
    pub(super) pending: Option<Conclusion>,
    pub(super) started_at: Option<Instant>,
}

impl<G: Send + Sync + 'static> Evolver<G> {
    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Generation being estimated or last yielded, 0 before seeding.
    pub fn generation(&self) -> u32 {
        match &self.phase {
            Phase::Unseeded => 0,
            Phase::Estimating(population) | Phase::Yielded(population) => population.generation(),
            Phase::Retiring(staged) => staged.generation,
        }
    }

    /// The live population. Its estimates keep moving while the evolver is running.
    ///
    /// `None` before seeding and while one generation is being replaced by the next.
    pub fn population(&self) -> Option<&Population<G>> {
        match &self.phase {
            Phase::Estimating(population) | Phase::Yielded(population) => Some(population),
            Phase::Unseeded | Phase::Retiring(_) => None,
        }
    }

    /// Receives sampler failures, estimator failures, generation and run conclusions.
    pub fn subscribe(&self) -> broadcast::Receiver<EvolutionEvent> {
        self.publisher.subscribe()
    }

    /// Produces the next generation.
    ///
    /// Returns `None` once the run has ended. An error is always the last item.
    #[instrument(level = "info", skip(self), fields(generation = self.generation(), state = ?self.state))]
    pub async fn next(&mut self) -> Option<Result<PopulationSnapshot<G>, Error>> {
        if matches!(self.state, State::Stopped | State::Failed) {
            return None;
        }

        if let Some(conclusion) = self.should_stop() {
            self.stop(conclusion).await;
            return None;
        }

        match self.produce().await {
            Ok((snapshot, forced)) => {
                self.state = State::Running;
                self.generations_yielded += 1;
                self.last_best = snapshot.best().and_then(|best| best.estimate().mean());

                if self
                    .convergence
                    .as_ref()
                    .is_some_and(|converged| converged(&snapshot))
                {
                    self.pending = Some(Conclusion::Completed);
                }

                tracing::info!(
                    message = "Generation completed",
                    generation = snapshot.generation(),
                    best_mean = ?self.last_best,
                    forced = forced
                );
                self.publisher.publish(GenerationCompletedEvent {
                    generation: snapshot.generation(),
                    best_mean: self.last_best,
                    forced,
                });

                Some(Ok(snapshot))
            }
            Err(err) => {
                self.fail(&err).await;
                Some(Err(err))
            }
        }
    }

    /// Consumes the evolver into a stream of generations. Dropping the stream cancels every
    /// estimator.
    pub fn into_stream(self) -> impl Stream<Item = Result<PopulationSnapshot<G>, Error>> {
        futures::stream::unfold(self, |mut evolver| async move {
            let item = evolver.next().await?;
            Some((item, evolver))
        })
    }

    /// Drives the run to its end and returns the last generation.
    ///
    /// Without `max_generations`, `target_fitness`, `max_run_duration_ms` or a convergence
    /// predicate this never returns.
    pub async fn run(mut self) -> Result<Option<PopulationSnapshot<G>>, Error> {
        let mut last = None;
        while let Some(item) = self.next().await {
            last = Some(item?);
        }
        Ok(last)
    }

    /// Stops the run and waits until every estimator has exited.
    #[instrument(level = "info", skip(self), fields(generation = self.generation()))]
    pub async fn shutdown(&mut self) {
        if matches!(self.state, State::Stopped | State::Failed) {
            return;
        }
        self.stop(Conclusion::Terminated).await;
    }

    fn should_stop(&self) -> Option<Conclusion> {
        if let Some(conclusion) = self.pending {
            return Some(conclusion);
        }

        let elapsed = self
            .started_at
            .map_or(Duration::ZERO, |started_at| started_at.elapsed());

        self.termination
            .check(self.generations_yielded, self.last_best, elapsed)
    }

    /// Advances the generation cycle until a snapshot can be yielded.
    async fn produce(&mut self) -> Result<(PopulationSnapshot<G>, bool), Error> {
        loop {
            match &mut self.phase {
                Phase::Unseeded => {
                    let population = self.seed()?;
                    self.phase = Phase::Estimating(population);
                }
                Phase::Yielded(_) => {
                    if let Phase::Yielded(current) =
                        std::mem::replace(&mut self.phase, Phase::Unseeded)
                    {
                        let staged = self.stage(current)?;
                        self.phase = Phase::Retiring(staged);
                    }
                }
                Phase::Retiring(staged) => {
                    staged.retire().await;

                    if let Phase::Retiring(staged) =
                        std::mem::replace(&mut self.phase, Phase::Unseeded)
                    {
                        let population = staged.spawn(&self.sampler, &self.settings);
                        self.phase = Phase::Estimating(population);
                    }
                }
                Phase::Estimating(population) => {
                    let forced = wait_for_boundary(
                        &self.schedule,
                        self.boundary.as_ref(),
                        &self.wake,
                        population,
                    )
                    .await?;
                    let snapshot = population.snapshot();

                    if let Phase::Estimating(population) =
                        std::mem::replace(&mut self.phase, Phase::Unseeded)
                    {
                        self.phase = Phase::Yielded(population);
                    }

                    return Ok((snapshot, forced));
                }
            }
        }
    }

    #[instrument(level = "info", skip(self), fields(population_size = self.config.population_size))]
    fn seed(&mut self) -> Result<Population<G>, Error> {
        self.started_at = Some(Instant::now());

        let expected = self.config.population_size;
        let genomes = self
            .seeder
            .seed(expected, &mut self.rng)
            .map_err(Error::SeedError)?;

        if genomes.len() != expected {
            return Err(Error::SeedCountMismatch {
                expected,
                got: genomes.len(),
            });
        }

        let members = genomes
            .into_iter()
            .map(|genome| Chromosome::spawn(Arc::new(genome), 0, &self.sampler, &self.settings))
            .collect();

        Ok(Population::new(0, members))
    }

    /// Selects and reproduces, then sorts the current chromosomes into those carried over and
    /// those leaving.
    ///
    /// Elites and offspring identical to a parent keep their chromosome and estimator. On error
    /// the current population is put back.
    #[instrument(level = "info", skip(self, current), fields(generation = current.generation()))]
    fn stage(&mut self, current: Population<G>) -> Result<Staged<G>, Error> {
        let snapshot = current.snapshot();
        let elite_count = self.config.elite_count.min(snapshot.len());

        let offspring = match self.reproduce(&snapshot, elite_count) {
            Ok(offspring) => offspring,
            Err(err) => {
                // Keep it around so failing cancels its estimators
                self.phase = Phase::Yielded(current);
                return Err(err);
            }
        };

        let generation = current.generation() + 1;
        let mut survivors: HashMap<Uuid, Chromosome<G>> = current
            .into_members()
            .into_iter()
            .map(|chromosome| (chromosome.id(), chromosome))
            .collect();

        let mut carried = Vec::with_capacity(self.config.population_size);
        for elite in snapshot.iter().take(elite_count) {
            if let Some(chromosome) = survivors.remove(&elite.chromosome_id()) {
                carried.push(chromosome);
            }
        }

        let mut fresh = Vec::with_capacity(offspring.len());
        for child in offspring {
            match self
                .carried_parent(&snapshot, &child, &survivors)
                .and_then(|id| survivors.remove(&id))
            {
                Some(parent) => carried.push(parent),
                None => fresh.push(child.genome),
            }
        }

        Ok(Staged {
            generation,
            carried,
            fresh,
            retiring: survivors.into_values().collect(),
        })
    }

    /// Picks parents and breeds one offspring per pair for every non-elite slot.
    fn reproduce(
        &mut self,
        snapshot: &PopulationSnapshot<G>,
        elite_count: usize,
    ) -> Result<Vec<Offspring<G>>, Error> {
        let num_offspring = self.config.population_size.saturating_sub(elite_count);
        if num_offspring == 0 {
            return Ok(Vec::new());
        }

        let expected = num_offspring * 2;
        let parents = self.selection.select(snapshot, expected, &mut self.rng)?;

        if parents.len() != expected {
            return Err(Error::InvalidSelection {
                expected,
                got: parents.len(),
            });
        }
        if let Some(&index) = parents.iter().find(|&&index| index >= snapshot.len()) {
            return Err(Error::InvalidParentIndex {
                index,
                population_size: snapshot.len(),
            });
        }

        let elapsed = self
            .started_at
            .map_or(Duration::ZERO, |started_at| started_at.elapsed());
        let progress = self.termination.progress(snapshot.generation(), elapsed);
        let mutation_rate = self.config.mutation_rate.get(progress);

        let mut offspring = Vec::with_capacity(num_offspring);
        for pair in parents.chunks_exact(2) {
            let lhs = snapshot.members()[pair[0]].genome();
            let rhs = snapshot.members()[pair[1]].genome();

            let mut genome = self
                .recombination
                .recombine(lhs, rhs, &mut self.rng)
                .map_err(Error::RecombinationError)?;

            if self.rng.random_bool(mutation_rate) {
                genome = self
                    .mutation
                    .mutate(genome, progress, &mut self.rng)
                    .map_err(Error::MutationError)?;
            }

            offspring.push(Offspring {
                genome,
                parents: [pair[0], pair[1]],
            });
        }

        Ok(offspring)
    }

    /// Finds a parent, not yet claimed, whose genome equals the offspring's.
    fn carried_parent(
        &self,
        snapshot: &PopulationSnapshot<G>,
        child: &Offspring<G>,
        survivors: &HashMap<Uuid, Chromosome<G>>,
    ) -> Option<Uuid> {
        let equality = self.equality.as_ref()?;

        child
            .parents
            .iter()
            .map(|&index| &snapshot.members()[index])
            .find(|parent| {
                survivors.contains_key(&parent.chromosome_id())
                    && equality(parent.genome(), &child.genome)
            })
            .map(|parent| parent.chromosome_id())
    }

    /// Cancels every estimator the evolver still owns.
    async fn retire(&mut self) {
        match &mut self.phase {
            Phase::Unseeded => {}
            Phase::Estimating(population) | Phase::Yielded(population) => {
                population.retire().await
            }
            Phase::Retiring(staged) => staged.retire_all().await,
        }
    }

    #[instrument(level = "info", skip(self), fields(generations = self.generations_yielded))]
    async fn stop(&mut self, conclusion: Conclusion) {
        self.state = State::Stopped;
        self.retire().await;

        tracing::info!(
            message = "Evolution concluded",
            generations = self.generations_yielded,
            conclusion = ?conclusion
        );
        self.publisher.publish(ConcludedEvent {
            generations: self.generations_yielded,
            conclusion,
        });
    }

    async fn fail(&mut self, err: &Error) {
        self.state = State::Failed;
        self.retire().await;

        tracing::error!(
            message = "Evolution failed",
            generations = self.generations_yielded,
            error = %err
        );
        self.publisher.publish(ConcludedEvent {
            generations: self.generations_yielded,
            conclusion: Conclusion::Failed,
        });
    }
}

/// Waits until the schedule allows selecting from `population`. Returns whether the wait was
/// cut short by the generation duration cap.
#[instrument(level = "debug", skip_all, fields(generation = population.generation()))]
async fn wait_for_boundary<G>(
    schedule: &Schedule,
    boundary: Option<&BoundaryPredicate>,
    wake: &Notify,
    population: &Population<G>,
) -> Result<bool, Error> {
    let started = population.estimating_since();
    let deadline = schedule
        .max_generation_duration
        .map(|duration| started + duration);

    loop {
        // Estimator updates between the check and the await leave a permit behind
        let notified = wake.notified();

        match schedule.should_select(&population.estimations(), started.elapsed(), boundary) {
            ScheduleDecision::Select { forced } => return Ok(forced),
            ScheduleDecision::Fail => {
                return Err(Error::AllEstimatorsFailed {
                    generation: population.generation(),
                });
            }
            ScheduleDecision::Wait => {}
        }

        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => notified.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bootstrap::{Configuration, bootstrap};
    use crate::models::{EstimatorStatus, Recombination};
    use crate::services::evolution::{Error, State};
    use rand::rngs::StdRng;
    use std::time::Duration;

    fn seeder(genomes: Vec<Vec<i64>>) -> impl Fn(usize, &mut StdRng) -> anyhow::Result<Vec<Vec<i64>>> {
        move |_: usize, _: &mut StdRng| Ok(genomes.clone())
    }

    #[tokio::test]
    async fn it_stops_before_seeding_with_zero_generations() {
        let config = Configuration {
            max_generations: Some(0),
            ..Configuration::new(2)
        };
        let mut evolver = bootstrap::<Vec<i64>>(config)
            .unwrap()
            .with_seeder(seeder(vec![vec![1], vec![2]]))
            .with_sampler(|genome: Vec<i64>| async move { Ok::<f64, anyhow::Error>(genome[0] as f64) })
            .build();

        assert!(evolver.next().await.is_none());
        assert_eq!(evolver.state(), State::Stopped);
        assert!(evolver.population().is_none());
    }

    #[tokio::test]
    async fn it_fails_on_wrong_seed_count() {
        let mut evolver = bootstrap::<Vec<i64>>(Configuration::new(3))
            .unwrap()
            .with_seeder(seeder(vec![vec![1]]))
            .with_sampler(|genome: Vec<i64>| async move { Ok::<f64, anyhow::Error>(genome[0] as f64) })
            .build();

        let result = evolver.next().await;

        assert!(matches!(
            result,
            Some(Err(Error::SeedCountMismatch {
                expected: 3,
                got: 1
            }))
        ));
        assert_eq!(evolver.state(), State::Failed);
        assert!(evolver.next().await.is_none());
    }

    struct Incompatible;

    impl Recombination<Vec<i64>> for Incompatible {
        fn recombine(
            &self,
            _lhs: &Vec<i64>,
            _rhs: &Vec<i64>,
            _rng: &mut StdRng,
        ) -> anyhow::Result<Vec<i64>> {
            Err(anyhow::anyhow!("incompatible parents"))
        }
    }

    #[tokio::test]
    async fn it_fails_when_recombination_fails() {
        let mut evolver = bootstrap::<Vec<i64>>(Configuration::new(2))
            .unwrap()
            .with_seeder(seeder(vec![vec![1, 2], vec![3]]))
            .with_sampler(|genome: Vec<i64>| async move {
                Ok::<f64, anyhow::Error>(genome.len() as f64)
            })
            .with_recombination(Incompatible)
            .build();

        assert!(evolver.next().await.unwrap().is_ok());

        let result = evolver.next().await;

        assert!(matches!(result, Some(Err(Error::RecombinationError(_)))));
        assert_eq!(evolver.state(), State::Failed);
        assert!(evolver.next().await.is_none());
        // The failed generation keeps its chromosomes, all cancelled
        let population = evolver.population().unwrap();
        assert_eq!(population.generation(), 0);
        assert!(
            population
                .members()
                .iter()
                .all(|member| member.status() == EstimatorStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn it_resumes_a_pull_dropped_while_retiring() {
        let mut evolver = bootstrap::<Vec<i64>>(Configuration::new(3))
            .unwrap()
            .with_seeder(seeder(vec![vec![1], vec![2], vec![3]]))
            .with_sampler(|genome: Vec<i64>| async move { Ok::<f64, anyhow::Error>(genome[0] as f64) })
            .build();

        let first = evolver.next().await.unwrap().unwrap();
        assert_eq!(first.generation(), 0);

        // Estimators cannot exit within zero time, so the pull is dropped mid-retirement
        let interrupted = tokio::time::timeout(Duration::ZERO, evolver.next()).await;
        assert!(interrupted.is_err());
        assert_eq!(evolver.state(), State::Running);
        assert_eq!(evolver.generation(), 1);

        let second = evolver.next().await.unwrap().unwrap();
        assert_eq!(second.generation(), 1);
        assert_eq!(second.len(), 3);
        assert!(
            second
                .iter()
                .all(|member| member.generation_born() == 1 && member.estimate().count() > 0)
        );

        let third = evolver.next().await.unwrap().unwrap();
        assert_eq!(third.generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn it_resumes_a_pull_dropped_while_estimating() {
        let config = Configuration {
            max_generation_duration_ms: Some(200),
            ..Configuration::new(2)
        };
        let mut evolver = bootstrap::<Vec<i64>>(config)
            .unwrap()
            .with_seeder(seeder(vec![vec![1], vec![2]]))
            .with_sampler(|_: Vec<i64>| futures::future::pending::<anyhow::Result<f64>>())
            .build();

        let interrupted = tokio::time::timeout(Duration::from_millis(50), evolver.next()).await;
        assert!(interrupted.is_err());
        let seeded = evolver.population().unwrap();
        let ids: Vec<_> = seeded.members().iter().map(|member| member.id()).collect();
        let since = seeded.estimating_since();

        let snapshot = evolver.next().await.unwrap().unwrap();

        // Same population, same deadline: no reseeding and no fresh duration cap
        assert_eq!(snapshot.generation(), 0);
        assert!(snapshot.iter().all(|member| ids.contains(&member.chromosome_id())));
        assert!(since.elapsed() >= Duration::from_millis(200));
        assert!(since.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn it_shuts_down_explicitly() {
        let mut evolver = bootstrap::<Vec<i64>>(Configuration::new(2))
            .unwrap()
            .with_seeder(seeder(vec![vec![1], vec![2]]))
            .with_sampler(|genome: Vec<i64>| async move { Ok::<f64, anyhow::Error>(genome[0] as f64) })
            .build();

        let snapshot = evolver.next().await.unwrap().unwrap();
        evolver.shutdown().await;

        assert_eq!(snapshot.len(), 2);
        assert_eq!(evolver.state(), State::Stopped);
        assert!(evolver.next().await.is_none());
    }
}
