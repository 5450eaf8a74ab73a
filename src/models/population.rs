use super::{FitnessEstimate, Individual};
use chrono::{DateTime, Utc};

/// Point-in-time view of a population, sorted best first.
///
/// Members are value copies: estimators keep sampling after the snapshot is taken, but the
/// snapshot never changes. Ordering follows [`FitnessEstimate::rank`], so members without a
/// single sample come last.
#[derive(Debug)]
pub struct PopulationSnapshot<G> {
    pub(crate) generation: u32,
    pub(crate) members: Vec<Individual<G>>,
    pub(crate) taken_at: DateTime<Utc>,
}

impl<G> Clone for PopulationSnapshot<G> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            members: self.members.clone(),
            taken_at: self.taken_at,
        }
    }
}

impl<G> PopulationSnapshot<G> {
    pub(crate) fn new(generation: u32, mut members: Vec<Individual<G>>) -> Self {
        // Stable, so equally ranked members keep population order
        members.sort_by(|a, b| a.estimate.rank(&b.estimate));

        Self {
            generation,
            members,
            taken_at: Utc::now(),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn members(&self) -> &[Individual<G>] {
        &self.members
    }

    pub fn best(&self) -> Option<&Individual<G>> {
        self.members.first()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Individual<G>> {
        self.members.iter()
    }

    pub fn estimates(&self) -> Vec<FitnessEstimate> {
        self.members.iter().map(|member| member.estimate).collect()
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

impl<'a, G> IntoIterator for &'a PopulationSnapshot<G> {
    type Item = &'a Individual<G>;
    type IntoIter = std::slice::Iter<'a, Individual<G>>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::EstimatorStatus;
    use std::sync::Arc;
    use uuid::Uuid;

    pub(crate) fn individual<G>(genome: G, samples: &[f64]) -> Individual<G> {
        let mut estimate = FitnessEstimate::new();
        for &sample in samples {
            estimate.update(sample);
        }

        Individual {
            chromosome_id: Uuid::now_v7(),
            genome: Arc::new(genome),
            estimate,
            status: EstimatorStatus::Running,
            generation_born: 0,
        }
    }

    #[test]
    fn it_sorts_members_best_first() {
        let snapshot = PopulationSnapshot::new(
            0,
            vec![
                individual('A', &[10.0]),
                individual('B', &[20.0]),
                individual('C', &[5.0]),
                individual('D', &[15.0]),
            ],
        );

        let order: String = snapshot.iter().map(|member| *member.genome()).collect();
        assert_eq!(order, "BDAC");
        assert_eq!(snapshot.best().map(|best| *best.genome()), Some('B'));
    }

    #[test]
    fn it_puts_unsampled_members_last() {
        let snapshot = PopulationSnapshot::new(
            2,
            vec![
                individual('x', &[]),
                individual('y', &[-100.0]),
                individual('z', &[]),
            ],
        );

        let order: String = snapshot.iter().map(|member| *member.genome()).collect();
        assert_eq!(order, "yxz");
        assert_eq!(snapshot.generation(), 2);
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn it_copies_estimates() {
        let snapshot = PopulationSnapshot::new(0, vec![individual(1u8, &[1.0, 3.0])]);

        let estimates = snapshot.estimates();

        assert_eq!(estimates.len(), 1);
        assert_eq!(estimates[0].mean(), Some(2.0));
        assert_eq!(estimates[0].count(), 2);
    }
}
