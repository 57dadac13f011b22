//! Replica ranking strategies
//!
//! A strategy orders a request's candidate set, best first. Every strategy except
//! `Random` and `Primary` sorts by a per-replica score; ties keep candidate order.

use crate::error::ConfigError;
use crate::replica::ReplicaId;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionStrategy {
    /// Uniformly shuffled candidates.
    #[serde(rename = "random")]
    Random,
    /// Fewest outstanding requests from this client.
    #[serde(rename = "pending")]
    Pending,
    /// Lowest last observed response time.
    #[serde(rename = "response_time")]
    ResponseTime,
    /// Candidate order, so the first replica of the set always wins.
    #[serde(rename = "primary")]
    Primary,
    /// Lowest `(1 + pending) * advertised service time`.
    #[serde(rename = "pendingXserviceTime")]
    PendingXServiceTime,
    /// Like `PendingXServiceTime` but with the replica's true occupancy instead of
    /// this client's pending count.
    #[serde(rename = "pendingXserviceTimeOracle")]
    PendingXServiceTimeOracle,
    /// Lowest expected delay from the feedback window.
    #[serde(rename = "expDelay")]
    ExpectedDelay,
}

impl SelectionStrategy {
    pub const ALL: [SelectionStrategy; 7] = [
        SelectionStrategy::Random,
        SelectionStrategy::Pending,
        SelectionStrategy::ResponseTime,
        SelectionStrategy::Primary,
        SelectionStrategy::PendingXServiceTime,
        SelectionStrategy::PendingXServiceTimeOracle,
        SelectionStrategy::ExpectedDelay,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SelectionStrategy::Random => "random",
            SelectionStrategy::Pending => "pending",
            SelectionStrategy::ResponseTime => "response_time",
            SelectionStrategy::Primary => "primary",
            SelectionStrategy::PendingXServiceTime => "pendingXserviceTime",
            SelectionStrategy::PendingXServiceTimeOracle => "pendingXserviceTimeOracle",
            SelectionStrategy::ExpectedDelay => "expDelay",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SelectionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| ConfigError::UnknownStrategy(s.to_string()))
    }
}

/// Per-replica state a strategy can score by.
pub trait ReplicaView {
    fn pending(&self, replica: ReplicaId) -> usize;
    /// `(1 + pending) * mean service time`, in seconds.
    fn pending_x_service(&self, replica: ReplicaId) -> f64;
    /// Last observed response time in seconds, 0 before any completion.
    fn last_response_time(&self, replica: ReplicaId) -> f64;
    fn expected_delay(&self, replica: ReplicaId) -> f64;
    /// `(1 + occupancy) * mean service time` from the replica's live queue, in seconds.
    fn oracle_load(&self, replica: ReplicaId) -> f64;
}

/// Order `candidates` best first. Only `Random` draws from `rng`.
pub fn rank<V, R>(
    strategy: SelectionStrategy,
    candidates: &[ReplicaId],
    view: &V,
    rng: &mut R,
) -> Vec<ReplicaId>
where
    V: ReplicaView + ?Sized,
    R: Rng + ?Sized,
{
    let mut ranked = candidates.to_vec();
    let score: fn(&V, ReplicaId) -> f64 = match strategy {
        SelectionStrategy::Random => {
            ranked.shuffle(rng);
            return ranked;
        }
        SelectionStrategy::Primary => return ranked,
        SelectionStrategy::Pending => |v, r| v.pending(r) as f64,
        SelectionStrategy::ResponseTime => |v, r| v.last_response_time(r),
        SelectionStrategy::PendingXServiceTime => |v, r| v.pending_x_service(r),
        SelectionStrategy::PendingXServiceTimeOracle => |v, r| v.oracle_load(r),
        SelectionStrategy::ExpectedDelay => |v, r| v.expected_delay(r),
    };
    let mut scored: Vec<(f64, ReplicaId)> = ranked.drain(..).map(|r| (score(view, r), r)).collect();
    // Stable, so equal scores keep candidate order
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Fixed {
        scores: Vec<f64>,
    }

    impl ReplicaView for Fixed {
        fn pending(&self, replica: ReplicaId) -> usize {
            self.scores[replica.0] as usize
        }
        fn pending_x_service(&self, replica: ReplicaId) -> f64 {
            self.scores[replica.0]
        }
        fn last_response_time(&self, replica: ReplicaId) -> f64 {
            self.scores[replica.0]
        }
        fn expected_delay(&self, replica: ReplicaId) -> f64 {
            self.scores[replica.0]
        }
        fn oracle_load(&self, replica: ReplicaId) -> f64 {
            self.scores[replica.0]
        }
    }

    fn ids(xs: &[usize]) -> Vec<ReplicaId> {
        xs.iter().copied().map(ReplicaId).collect()
    }

    #[test]
    fn test_names_round_trip() {
        for strategy in SelectionStrategy::ALL {
            assert_eq!(strategy.name().parse::<SelectionStrategy>().unwrap(), strategy);
        }
        assert_eq!(
            "dynamicSnitch".parse::<SelectionStrategy>(),
            Err(ConfigError::UnknownStrategy("dynamicSnitch".into()))
        );
    }

    #[test]
    fn test_score_strategies_sort_ascending_and_stably() {
        let view = Fixed {
            scores: vec![3.0, 1.0, 3.0, 0.0],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = ids(&[0, 1, 2, 3]);
        for strategy in [
            SelectionStrategy::Pending,
            SelectionStrategy::ResponseTime,
            SelectionStrategy::PendingXServiceTime,
            SelectionStrategy::PendingXServiceTimeOracle,
            SelectionStrategy::ExpectedDelay,
        ] {
            assert_eq!(rank(strategy, &candidates, &view, &mut rng), ids(&[3, 1, 0, 2]), "{strategy}");
        }
    }

    #[test]
    fn test_primary_keeps_order() {
        let view = Fixed {
            scores: vec![9.0, 1.0, 0.0],
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            rank(SelectionStrategy::Primary, &ids(&[2, 0, 1]), &view, &mut rng),
            ids(&[2, 0, 1])
        );
    }

    #[test]
    fn test_random_is_a_seeded_permutation() {
        let view = Fixed { scores: vec![0.0; 5] };
        let candidates = ids(&[0, 1, 2, 3, 4]);
        let a = rank(SelectionStrategy::Random, &candidates, &view, &mut StdRng::seed_from_u64(3));
        let b = rank(SelectionStrategy::Random, &candidates, &view, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, candidates);
    }
}
