use super::estimator::{Estimator, EstimatorHandle, EstimatorSettings};
use crate::models::{
    EstimatorStatus, Estimation, FitnessEstimate, Individual, PopulationSnapshot, Sampler,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// A candidate genome together with its continuously refined fitness estimate.
#[derive(Debug)]
pub struct Chromosome<G> {
    id: Uuid,
    genome: Arc<G>,
    generation_born: u32,
    estimation: watch::Receiver<Estimation>,
    estimator: Option<EstimatorHandle>,
}

impl<G: Send + Sync + 'static> Chromosome<G> {
    /// Creates a chromosome and starts estimating its fitness right away.
    pub(crate) fn spawn(
        genome: Arc<G>,
        generation_born: u32,
        sampler: &Arc<dyn Sampler<G>>,
        settings: &EstimatorSettings,
    ) -> Self {
        let id = Uuid::now_v7();
        let (sender, estimation) = watch::channel(Estimation::default());
        let estimator = Estimator::start(
            id,
            Arc::clone(&genome),
            Arc::clone(sampler),
            settings.clone(),
            sender,
        );

        Self {
            id,
            genome,
            generation_born,
            estimation,
            estimator: Some(estimator),
        }
    }
}

impl<G> Chromosome<G> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn genome(&self) -> &G {
        &self.genome
    }

    pub fn generation_born(&self) -> u32 {
        self.generation_born
    }

    /// Copy of the current estimate.
    pub fn estimate(&self) -> FitnessEstimate {
        self.estimation.borrow().estimate
    }

    pub fn status(&self) -> EstimatorStatus {
        self.estimation().status
    }

    pub(crate) fn estimation(&self) -> Estimation {
        let mut estimation = *self.estimation.borrow();

        // An estimator that exits on its own always publishes its final status first
        let exited = self
            .estimator
            .as_ref()
            .is_some_and(|estimator| estimator.is_finished());
        if exited && estimation.status == EstimatorStatus::Running {
            estimation.status = EstimatorStatus::Aborted;
        }

        estimation
    }

    pub(crate) fn individual(&self) -> Individual<G> {
        let estimation = self.estimation();

        Individual {
            chromosome_id: self.id,
            genome: Arc::clone(&self.genome),
            estimate: estimation.estimate,
            status: estimation.status,
            generation_born: self.generation_born,
        }
    }

    /// Stops the estimator and waits for it to exit. The estimate is kept.
    ///
    /// Safe to call again after an interrupted call.
    pub(crate) async fn retire(&mut self) -> EstimatorStatus {
        match self.estimator.as_mut() {
            Some(estimator) => estimator.cancel().await,
            None => self.estimation.borrow().status,
        }
    }
}

/// The live chromosomes of one generation, owned by the evolver.
#[derive(Debug)]
pub struct Population<G> {
    generation: u32,
    members: Vec<Chromosome<G>>,
    estimating_since: Instant,
}

impl<G> Population<G> {
    pub(crate) fn new(generation: u32, members: Vec<Chromosome<G>>) -> Self {
        Self {
            generation,
            members,
            estimating_since: Instant::now(),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// When this generation's estimation started.
    pub fn estimating_since(&self) -> Instant {
        self.estimating_since
    }

    pub fn members(&self) -> &[Chromosome<G>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Sorted value copy of every member, best first.
    pub fn snapshot(&self) -> PopulationSnapshot<G> {
        PopulationSnapshot::new(
            self.generation,
            self.members.iter().map(Chromosome::individual).collect(),
        )
    }

    /// Best ranked member right now.
    pub fn best(&self) -> Option<&Chromosome<G>> {
        // min_by keeps the first of equally ranked members, like the stable snapshot sort
        self.members
            .iter()
            .min_by(|a, b| a.estimate().rank(&b.estimate()))
    }

    /// Unsorted copies of the current estimates, in member order.
    pub fn estimates(&self) -> Vec<FitnessEstimate> {
        self.members.iter().map(Chromosome::estimate).collect()
    }

    pub(crate) fn estimations(&self) -> Vec<Estimation> {
        self.members.iter().map(Chromosome::estimation).collect()
    }

    /// Whether every estimator has given up.
    pub fn all_failed(&self) -> bool {
        !self.members.is_empty()
            && self
                .members
                .iter()
                .all(|member| member.estimation().status.is_frozen())
    }

    pub(crate) fn into_members(self) -> Vec<Chromosome<G>> {
        self.members
    }

    /// Cancels every estimator and waits until all have exited.
    pub(crate) async fn retire(&mut self) {
        futures::future::join_all(self.members.iter_mut().map(|member| member.retire())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EstimateMode;
    use crate::services::evolution::events::Publisher;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn settings() -> EstimatorSettings {
        EstimatorSettings {
            consecutive_failure_threshold: 3,
            estimate_mode: EstimateMode::Cumulative,
            wake: Arc::new(Notify::new()),
            publisher: Publisher::new(),
        }
    }

    fn population(fitness: &[(char, f64)]) -> Population<char> {
        let values: std::collections::HashMap<char, f64> = fitness.iter().copied().collect();
        let sampler: Arc<dyn Sampler<char>> = Arc::new(move |genome: char| {
            let value = values[&genome];
            async move { Ok::<f64, anyhow::Error>(value) }
        });
        let settings = settings();

        Population::new(
            0,
            fitness
                .iter()
                .map(|(genome, _)| Chromosome::spawn(Arc::new(*genome), 0, &sampler, &settings))
                .collect(),
        )
    }

    #[tokio::test]
    async fn it_snapshots_in_rank_order() {
        let mut population =
            population(&[('A', 10.0), ('B', 20.0), ('C', 5.0), ('D', 15.0)]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        population.retire().await;

        let snapshot = population.snapshot();
        let order: String = snapshot.iter().map(|member| *member.genome()).collect();

        assert_eq!(order, "BDAC");
        assert_eq!(population.best().map(|best| *best.genome()), Some('B'));
        assert_eq!(population.estimates().len(), 4);
        assert!(!population.all_failed());
    }

    #[tokio::test]
    async fn it_keeps_estimates_after_retiring() {
        let mut population = population(&[('A', 1.0)]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        population.retire().await;

        let before = population.estimates();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(population.estimates(), before);
        assert!(before[0].count() > 0);
        assert_eq!(population.members()[0].status(), EstimatorStatus::Cancelled);
    }

    #[tokio::test]
    async fn it_retires_idempotently() {
        let mut population = population(&[('A', 1.0), ('B', 2.0)]);
        tokio::time::sleep(Duration::from_millis(10)).await;

        // An interrupted retirement is picked up by the next one
        let interrupted = tokio::time::timeout(Duration::ZERO, population.retire()).await;
        assert!(interrupted.is_err());
        population.retire().await;
        population.retire().await;

        assert!(
            population
                .members()
                .iter()
                .all(|member| member.status() == EstimatorStatus::Cancelled)
        );
        assert!(population.estimates().iter().all(|estimate| estimate.count() > 0));
    }
}
