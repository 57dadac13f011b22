//! Per-replica admission state
//!
//! A [`RateAdapter`] decides whether a backlogged request may be sent to a replica, and
//! adapts its limits after every completion by comparing the cluster-wide service-time
//! ceiling (`mu_max`) with the replica's expected delay.

use crate::config::{AdmissionPolicy, ClientConfig, TokenBucketConfig};
use crate::replica::ReplicaId;
use serde::Serialize;
use std::time::Duration;
use tracing::trace;

/// Admission state of one replica, for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AdmissionSnapshot {
    TokenBucket { tokens: u32, max_tokens: u32, alpha: f64 },
    AdaptiveThreshold { threshold: u32 },
}

pub trait RateAdapter {
    fn policy(&self) -> AdmissionPolicy;

    /// Whether `replica` currently admits one more request.
    fn try_acquire(&self, replica: ReplicaId, pending: usize) -> bool;

    /// Consume the grant used by a send.
    fn on_send(&mut self, replica: ReplicaId);

    /// Adjust limits after a completion at `replica`. Times are in seconds.
    fn adapt(&mut self, replica: ReplicaId, mu_max: f64, expected_delay: f64, pending: usize);

    /// How long until the next periodic refill, for adapters that refill.
    fn refill_period(&self, replica: ReplicaId) -> Option<Duration>;

    /// Periodic refill. Returns whether any state changed.
    fn refill(&mut self, replica: ReplicaId) -> bool;

    /// Force the limit (tokens or threshold) of a replica.
    fn set_limit(&mut self, replica: ReplicaId, limit: u32);

    fn snapshot(&self, replica: ReplicaId) -> AdmissionSnapshot;
}

/// Build the adapter selected by `config` for a pool of `replicas`.
pub fn build_adapter(config: &ClientConfig, replicas: usize) -> Box<dyn RateAdapter> {
    match config.admission {
        AdmissionPolicy::TokenBucket => Box::new(TokenBucket::new(config.token_bucket, replicas)),
        AdmissionPolicy::AdaptiveThreshold => {
            Box::new(AdaptiveThreshold::new(config.initial_threshold, replicas))
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u32,
    alpha: f64,
}

/// One bucket per replica. A token is added every `alpha * refill_unit + refill_epsilon`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    buckets: Vec<Bucket>,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig, replicas: usize) -> Self {
        let bucket = Bucket {
            tokens: config.initial_tokens.min(config.max_tokens),
            alpha: config.initial_alpha.max(0.0),
        };
        Self {
            config,
            buckets: vec![bucket; replicas],
        }
    }

    pub fn tokens(&self, replica: ReplicaId) -> u32 {
        self.buckets[replica.0].tokens
    }

    pub fn alpha(&self, replica: ReplicaId) -> f64 {
        self.buckets[replica.0].alpha
    }
}

impl RateAdapter for TokenBucket {
    fn policy(&self) -> AdmissionPolicy {
        AdmissionPolicy::TokenBucket
    }

    fn try_acquire(&self, replica: ReplicaId, _pending: usize) -> bool {
        self.buckets[replica.0].tokens > 0
    }

    fn on_send(&mut self, replica: ReplicaId) {
        let bucket = &mut self.buckets[replica.0];
        bucket.tokens = bucket.tokens.saturating_sub(1);
    }

    fn adapt(&mut self, replica: ReplicaId, mu_max: f64, expected_delay: f64, _pending: usize) {
        let bucket = &mut self.buckets[replica.0];
        if mu_max > expected_delay {
            bucket.alpha -= 1.0;
        } else if mu_max < expected_delay {
            bucket.alpha += 1.0;
        }
        bucket.alpha = bucket.alpha.max(0.0);
        trace!(%replica, alpha = bucket.alpha, mu_max, expected_delay, "Adapted refill rate");
    }

    fn refill_period(&self, replica: ReplicaId) -> Option<Duration> {
        let alpha = self.buckets[replica.0].alpha;
        Some(self.config.refill_unit.mul_f64(alpha) + self.config.refill_epsilon)
    }

    fn refill(&mut self, replica: ReplicaId) -> bool {
        let bucket = &mut self.buckets[replica.0];
        if bucket.tokens < self.config.max_tokens {
            bucket.tokens += 1;
            true
        } else {
            false
        }
    }

    fn set_limit(&mut self, replica: ReplicaId, limit: u32) {
        self.buckets[replica.0].tokens = limit.min(self.config.max_tokens);
    }

    fn snapshot(&self, replica: ReplicaId) -> AdmissionSnapshot {
        let bucket = self.buckets[replica.0];
        AdmissionSnapshot::TokenBucket {
            tokens: bucket.tokens,
            max_tokens: self.config.max_tokens,
            alpha: bucket.alpha,
        }
    }
}

/// AIMD limit on a client's outstanding requests per replica.
///
/// Admits while `pending < threshold`. A completion adds one when the cluster ceiling
/// exceeds the replica's expected delay and halves the threshold otherwise.
#[derive(Debug, Clone)]
pub struct AdaptiveThreshold {
    thresholds: Vec<u32>,
}

impl AdaptiveThreshold {
    /// Fractional starting thresholds round up. The start never drops below one.
    pub fn new(initial: f64, replicas: usize) -> Self {
        let initial = (initial.ceil() as u32).max(1);
        Self {
            thresholds: vec![initial; replicas],
        }
    }

    pub fn threshold(&self, replica: ReplicaId) -> u32 {
        self.thresholds[replica.0]
    }
}

impl RateAdapter for AdaptiveThreshold {
    fn policy(&self) -> AdmissionPolicy {
        AdmissionPolicy::AdaptiveThreshold
    }

    fn try_acquire(&self, replica: ReplicaId, pending: usize) -> bool {
        pending < self.thresholds[replica.0] as usize
    }

    fn on_send(&mut self, _replica: ReplicaId) {}

    fn adapt(&mut self, replica: ReplicaId, mu_max: f64, expected_delay: f64, pending: usize) {
        let threshold = &mut self.thresholds[replica.0];
        if mu_max > expected_delay {
            *threshold = threshold.saturating_add(1);
        } else {
            *threshold /= 2;
        }
        if *threshold < 1 && pending == 0 {
            *threshold = 1;
        }
        trace!(%replica, threshold = *threshold, mu_max, expected_delay, "Adapted threshold");
    }

    fn refill_period(&self, _replica: ReplicaId) -> Option<Duration> {
        None
    }

    fn refill(&mut self, _replica: ReplicaId) -> bool {
        false
    }

    fn set_limit(&mut self, replica: ReplicaId, limit: u32) {
        self.thresholds[replica.0] = limit;
    }

    fn snapshot(&self, replica: ReplicaId) -> AdmissionSnapshot {
        AdmissionSnapshot::AdaptiveThreshold {
            threshold: self.thresholds[replica.0],
        }
    }
}
