//! Random replica placement for new topics.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

pub type BrokerId = i32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Replication factor {replication_factor} exceeds the {brokers} available brokers")]
    InsufficientBrokers {
        replication_factor: i32,
        brokers: usize,
    },

    #[error("Partition count must be positive, got {0}")]
    InvalidPartitionCount(i32),

    #[error("Replication factor must be positive, got {0}")]
    InvalidReplicationFactor(i32),
}

/// Replica lists per partition, indexed by partition id.
///
/// Each list holds distinct brokers; its first entry is the preferred leader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PartitionPlan(Vec<Vec<BrokerId>>);

impl PartitionPlan {
    pub fn partitions(&self) -> &[Vec<BrokerId>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn preferred_leader(&self, partition: usize) -> Option<BrokerId> {
        self.0.get(partition).and_then(|replicas| replicas.first().copied())
    }

    pub fn into_inner(self) -> Vec<Vec<BrokerId>> {
        self.0
    }
}

fn distinct(brokers: &[BrokerId]) -> Vec<BrokerId> {
    brokers
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Draw `count` distinct brokers uniformly at random, without replacement.
///
/// Duplicate ids in `brokers` count once. Fails when fewer than `count`
/// distinct brokers are available; the draw is never shortened.
pub fn draw_distinct_brokers<R: Rng + ?Sized>(
    brokers: &[BrokerId],
    count: usize,
    rng: &mut R,
) -> Result<Vec<BrokerId>, PlanError> {
    let mut pool = distinct(brokers);
    if count > pool.len() {
        return Err(PlanError::InsufficientBrokers {
            replication_factor: i32::try_from(count).unwrap_or(i32::MAX),
            brokers: pool.len(),
        });
    }
    let (drawn, _) = pool.partial_shuffle(rng, count);
    Ok(drawn.to_vec())
}

/// Build a replica assignment for a new topic.
///
/// Every partition gets `replication_factor` distinct brokers drawn at random
/// from `brokers`; placement is not reproducible across runs. `_previous` is
/// accepted for incremental placement and currently ignored.
pub fn build_partition_plan<R: Rng + ?Sized>(
    num_partitions: i32,
    replication_factor: i32,
    brokers: &[BrokerId],
    _previous: Option<&PartitionPlan>,
    rng: &mut R,
) -> Result<PartitionPlan, PlanError> {
    let brokers = distinct(brokers);

    if replication_factor > 0 && replication_factor as usize > brokers.len() {
        return Err(PlanError::InsufficientBrokers {
            replication_factor,
            brokers: brokers.len(),
        });
    }
    if replication_factor <= 0 {
        return Err(PlanError::InvalidReplicationFactor(replication_factor));
    }
    if num_partitions <= 0 {
        return Err(PlanError::InvalidPartitionCount(num_partitions));
    }

    let replicas = (0..num_partitions)
        .map(|_| draw_distinct_brokers(&brokers, replication_factor as usize, rng))
        .collect::<Result<_, _>>()?;
    Ok(PartitionPlan(replicas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_plan_replicas_are_distinct_live_brokers() {
        let brokers = [1, 2, 3, 4, 5];
        let mut rng = StdRng::seed_from_u64(7);

        for trial in 0..1000 {
            let partitions = 1 + trial % 12;
            let rf = 1 + trial % 5;
            let plan = build_partition_plan(partitions, rf, &brokers, None, &mut rng).unwrap();

            assert_eq!(plan.len(), partitions as usize);
            for replicas in plan.partitions() {
                assert_eq!(replicas.len(), rf as usize);
                let unique: HashSet<_> = replicas.iter().collect();
                assert_eq!(unique.len(), replicas.len(), "duplicate in {replicas:?}");
                assert!(replicas.iter().all(|b| brokers.contains(b)));
            }
        }
    }

    #[test]
    fn test_draw_distinct_brokers() {
        let brokers = [3, 1, 4, 5, 9, 2, 6];
        let mut rng = StdRng::seed_from_u64(11);

        for trial in 0..1000 {
            let count = trial % (brokers.len() + 1);
            let drawn = draw_distinct_brokers(&brokers, count, &mut rng).unwrap();
            assert_eq!(drawn.len(), count);
            let unique: HashSet<_> = drawn.iter().collect();
            assert_eq!(unique.len(), count, "duplicate in {drawn:?}");
            assert!(drawn.iter().all(|b| brokers.contains(b)));
        }
    }

    #[test]
    fn test_draw_more_than_available_fails() {
        let mut rng = StdRng::seed_from_u64(5);
        for count in 3..10 {
            assert_eq!(
                draw_distinct_brokers(&[1, 2], count, &mut rng),
                Err(PlanError::InsufficientBrokers {
                    replication_factor: count as i32,
                    brokers: 2
                })
            );
        }
        assert!(draw_distinct_brokers(&[1, 1, 2], 3, &mut rng).is_err());
    }

    #[test]
    fn test_insufficient_brokers() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = build_partition_plan(3, 4, &[1, 2, 3], None, &mut rng).unwrap_err();
        assert_eq!(
            err,
            PlanError::InsufficientBrokers {
                replication_factor: 4,
                brokers: 3
            }
        );

        // duplicates in the broker list do not count twice
        let err = build_partition_plan(1, 2, &[1, 1], None, &mut rng).unwrap_err();
        assert!(matches!(err, PlanError::InsufficientBrokers { brokers: 1, .. }));
    }

    #[test]
    fn test_invalid_counts() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            build_partition_plan(0, 1, &[1], None, &mut rng),
            Err(PlanError::InvalidPartitionCount(0))
        );
        assert_eq!(
            build_partition_plan(1, 0, &[1], None, &mut rng),
            Err(PlanError::InvalidReplicationFactor(0))
        );
    }

    #[test]
    fn test_preferred_leader_is_first_replica() {
        let mut rng = StdRng::seed_from_u64(42);
        let plan = build_partition_plan(4, 3, &[10, 20, 30], None, &mut rng).unwrap();
        for (partition, replicas) in plan.partitions().iter().enumerate() {
            assert_eq!(plan.preferred_leader(partition), Some(replicas[0]));
        }
        assert_eq!(plan.preferred_leader(4), None);
    }

    #[test]
    fn test_leaders_spread_over_brokers() {
        let mut rng = StdRng::seed_from_u64(3);
        let plan = build_partition_plan(300, 1, &[1, 2, 3], None, &mut rng).unwrap();
        let leaders: HashSet<_> = (0..plan.len())
            .filter_map(|p| plan.preferred_leader(p))
            .collect();
        assert_eq!(leaders.len(), 3);
    }
}
