//! Client configuration and its builder
//!
//! Every numeric field is validated when the builder is consumed, and strategy,
//! access-pattern and admission-policy names are parsed there too, so a bad experiment
//! description fails before the simulation starts.
//!
//! ```
//! use des_replica::config::{ClientConfig, AdmissionPolicy};
//!
//! let config = ClientConfig::builder()
//!     .strategy_name("expDelay")
//!     .replication_factor(3)
//!     .backpressure(true)
//!     .admission(AdmissionPolicy::AdaptiveThreshold)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.replication_factor, 3);
//! ```

use crate::error::ConfigError;
use crate::replica::ServiceModel;
use crate::selection::SelectionStrategy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How a client picks the first replica of a request's candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    #[default]
    Uniform,
    /// zeta(2) draw modulo the pool size
    Zipfian,
}

impl FromStr for AccessPattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(AccessPattern::Uniform),
            "zipfian" => Ok(AccessPattern::Zipfian),
            other => Err(ConfigError::UnknownAccessPattern(other.to_string())),
        }
    }
}

impl fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessPattern::Uniform => "uniform",
            AccessPattern::Zipfian => "zipfian",
        })
    }
}

/// Which admission state backs the per-replica congestion decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    #[default]
    TokenBucket,
    AdaptiveThreshold,
}

impl FromStr for AdmissionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token_bucket" => Ok(AdmissionPolicy::TokenBucket),
            "adaptive_threshold" => Ok(AdmissionPolicy::AdaptiveThreshold),
            other => Err(ConfigError::UnknownAdmissionPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdmissionPolicy::TokenBucket => "token_bucket",
            AdmissionPolicy::AdaptiveThreshold => "adaptive_threshold",
        })
    }
}

/// One-way delay of every client/replica message: `base + N(jitter_mean, jitter_std_dev)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub base: Duration,
    pub jitter_mean: Duration,
    pub jitter_std_dev: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_micros(250),
            jitter_mean: Duration::ZERO,
            jitter_std_dev: Duration::from_micros(50),
        }
    }
}

/// Token-bucket parameters. One token is added every `alpha * refill_unit + refill_epsilon`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    pub max_tokens: u32,
    pub initial_tokens: u32,
    pub initial_alpha: f64,
    pub refill_unit: Duration,
    pub refill_epsilon: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            initial_tokens: 0,
            initial_alpha: 1.0,
            refill_unit: Duration::from_millis(1),
            refill_epsilon: Duration::from_nanos(100),
        }
    }
}

/// Complete description of a client's dispatch behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub strategy: SelectionStrategy,
    pub access_pattern: AccessPattern,
    /// Size of the candidate set (consecutive replicas, wrapping).
    pub replication_factor: usize,
    /// Route requests through per-replica admission controllers.
    pub backpressure: bool,
    /// Probability of duplicating a request to the rest of its candidate set.
    pub shadow_read_ratio: f64,
    pub admission: AdmissionPolicy,
    pub token_bucket: TokenBucketConfig,
    pub initial_threshold: f64,
    /// Number of feedback entries kept per replica.
    pub feedback_window: usize,
    /// Add the replica's reported queue length to the expected-delay multiplier.
    pub queue_size_feedback: bool,
    pub network: NetworkConfig,
    pub seed: u64,
    /// Keep every dispatch decision, not only the last one.
    pub record_decisions: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::ExpectedDelay,
            access_pattern: AccessPattern::Uniform,
            replication_factor: 3,
            backpressure: false,
            shadow_read_ratio: 0.0,
            admission: AdmissionPolicy::TokenBucket,
            token_bucket: TokenBucketConfig::default(),
            initial_threshold: 1.0,
            feedback_window: 10,
            queue_size_feedback: false,
            network: NetworkConfig::default(),
            seed: 42,
            record_decisions: false,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Check every constraint on an already assembled configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_positive("replication_factor", self.replication_factor)?;
        validate_range("shadow_read_ratio", self.shadow_read_ratio, 0.0, 1.0)?;
        validate_positive("feedback_window", self.feedback_window)?;
        // Thresholds start at one or more
        validate_range("initial_threshold", self.initial_threshold, 1.0, f64::from(u32::MAX))?;

        let tb = &self.token_bucket;
        validate_positive("token_bucket.max_tokens", tb.max_tokens)?;
        validate_range("token_bucket.initial_tokens", tb.initial_tokens, 0, tb.max_tokens)?;
        validate_non_negative("token_bucket.initial_alpha", tb.initial_alpha)?;
        validate_finite("token_bucket.initial_alpha", tb.initial_alpha)?;
        validate_positive("token_bucket.refill_unit", tb.refill_unit.as_nanos())?;
        Ok(())
    }
}

/// A pool of identical replicas. Replica `i` seeds its service times with `seed + i`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub count: usize,
    pub workers: usize,
    pub service: ServiceModel,
    pub seed: u64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            count: 3,
            workers: 1,
            service: ServiceModel::Exponential {
                mean: Duration::from_millis(4),
            },
            seed: 1,
        }
    }
}

impl ReplicaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_positive("replicas.count", self.count)?;
        validate_positive("replicas.workers", self.workers)?;
        Ok(())
    }
}

/// Builder for [`ClientConfig`].
///
/// Names set through the `*_name` methods are parsed in [`build`](Self::build), which
/// reports unknown names as [`ConfigError`]s.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
    strategy_name: Option<String>,
    access_pattern_name: Option<String>,
    admission_name: Option<String>,
}

impl ClientConfigBuilder {
    pub fn strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.config.strategy = strategy;
        self.strategy_name = None;
        self
    }

    pub fn strategy_name(mut self, name: impl Into<String>) -> Self {
        self.strategy_name = Some(name.into());
        self
    }

    pub fn access_pattern(mut self, pattern: AccessPattern) -> Self {
        self.config.access_pattern = pattern;
        self.access_pattern_name = None;
        self
    }

    pub fn access_pattern_name(mut self, name: impl Into<String>) -> Self {
        self.access_pattern_name = Some(name.into());
        self
    }

    pub fn replication_factor(mut self, rf: usize) -> Self {
        self.config.replication_factor = rf;
        self
    }

    pub fn backpressure(mut self, enabled: bool) -> Self {
        self.config.backpressure = enabled;
        self
    }

    pub fn shadow_read_ratio(mut self, ratio: f64) -> Self {
        self.config.shadow_read_ratio = ratio;
        self
    }

    pub fn admission(mut self, policy: AdmissionPolicy) -> Self {
        self.config.admission = policy;
        self.admission_name = None;
        self
    }

    pub fn admission_name(mut self, name: impl Into<String>) -> Self {
        self.admission_name = Some(name.into());
        self
    }

    pub fn token_bucket(mut self, token_bucket: TokenBucketConfig) -> Self {
        self.config.token_bucket = token_bucket;
        self
    }

    pub fn initial_threshold(mut self, threshold: f64) -> Self {
        self.config.initial_threshold = threshold;
        self
    }

    pub fn feedback_window(mut self, window: usize) -> Self {
        self.config.feedback_window = window;
        self
    }

    pub fn queue_size_feedback(mut self, enabled: bool) -> Self {
        self.config.queue_size_feedback = enabled;
        self
    }

    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.config.network = network;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn record_decisions(mut self, enabled: bool) -> Self {
        self.config.record_decisions = enabled;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let mut config = self.config;
        if let Some(name) = self.strategy_name {
            config.strategy = name.parse()?;
        }
        if let Some(name) = self.access_pattern_name {
            config.access_pattern = name.parse()?;
        }
        if let Some(name) = self.admission_name {
            config.admission = name.parse()?;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Helper for validating numeric ranges
pub fn validate_range<T: PartialOrd + fmt::Display>(
    field: &str,
    value: T,
    min: T,
    max: T,
) -> Result<(), ConfigError> {
    // Written so that NaN fails too
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::ConstraintViolation {
            field: field.to_string(),
            constraint: format!("between {min} and {max}"),
        })
    }
}

/// Helper for validating that a value is positive
pub fn validate_positive<T: PartialOrd + Default>(field: &str, value: T) -> Result<(), ConfigError> {
    if value > T::default() {
        Ok(())
    } else {
        Err(ConfigError::ConstraintViolation {
            field: field.to_string(),
            constraint: "positive".to_string(),
        })
    }
}

/// Helper for validating that a value is non-negative
pub fn validate_non_negative<T: PartialOrd + Default>(field: &str, value: T) -> Result<(), ConfigError> {
    if value >= T::default() {
        Ok(())
    } else {
        Err(ConfigError::ConstraintViolation {
            field: field.to_string(),
            constraint: "non-negative".to_string(),
        })
    }
}

/// Helper for validating that a float is neither infinite nor NaN
pub fn validate_finite(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::ConstraintViolation {
            field: field.to_string(),
            constraint: "finite".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_helpers() {
        assert!(validate_range("test", 5, 0, 10).is_ok());
        assert!(validate_range("test", 10, 0, 10).is_ok());
        assert!(validate_range("test", 11, 0, 10).is_err());
        assert!(validate_range("test", f64::NAN, 0.0, 1.0).is_err());
        assert!(validate_positive("test", 1).is_ok());
        assert!(validate_positive("test", 0).is_err());
        assert!(validate_non_negative("test", 0.0).is_ok());
        assert!(validate_non_negative("test", -0.5).is_err());
        assert!(validate_finite("test", 3.0).is_ok());
        assert!(validate_finite("test", f64::INFINITY).is_err());
        assert!(validate_finite("test", f64::NAN).is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::builder().build().unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.token_bucket.max_tokens, 100);
        assert_eq!(config.token_bucket.initial_tokens, 0);
        assert_eq!(config.feedback_window, 10);
    }

    #[test]
    fn test_names_are_parsed_at_build() {
        let config = ClientConfig::builder()
            .strategy_name("pendingXserviceTimeOracle")
            .access_pattern_name("zipfian")
            .admission_name("adaptive_threshold")
            .build()
            .unwrap();
        assert_eq!(config.strategy, SelectionStrategy::PendingXServiceTimeOracle);
        assert_eq!(config.access_pattern, AccessPattern::Zipfian);
        assert_eq!(config.admission, AdmissionPolicy::AdaptiveThreshold);

        let err = ClientConfig::builder().strategy_name("fastest").build().unwrap_err();
        assert_eq!(err, ConfigError::UnknownStrategy("fastest".into()));
        assert!(matches!(
            ClientConfig::builder().access_pattern_name("hot").build(),
            Err(ConfigError::UnknownAccessPattern(_))
        ));
        assert!(matches!(
            ClientConfig::builder().admission_name("leaky").build(),
            Err(ConfigError::UnknownAdmissionPolicy(_))
        ));
    }

    #[test]
    fn test_replica_config() {
        assert!(ReplicaConfig::default().validate().is_ok());
        let empty = ReplicaConfig {
            count: 0,
            ..ReplicaConfig::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_out_of_range_fields_are_rejected() {
        let cases = [
            ClientConfig::builder().replication_factor(0),
            ClientConfig::builder().shadow_read_ratio(1.5),
            ClientConfig::builder().feedback_window(0),
            ClientConfig::builder().initial_threshold(-1.0),
            ClientConfig::builder().initial_threshold(0.0),
            ClientConfig::builder().initial_threshold(0.5),
            ClientConfig::builder().initial_threshold(f64::NAN),
            ClientConfig::builder().token_bucket(TokenBucketConfig {
                initial_alpha: f64::INFINITY,
                ..TokenBucketConfig::default()
            }),
            ClientConfig::builder().token_bucket(TokenBucketConfig {
                initial_alpha: f64::NAN,
                ..TokenBucketConfig::default()
            }),
            ClientConfig::builder().token_bucket(TokenBucketConfig {
                initial_tokens: 101,
                ..TokenBucketConfig::default()
            }),
            ClientConfig::builder().token_bucket(TokenBucketConfig {
                refill_unit: Duration::ZERO,
                ..TokenBucketConfig::default()
            }),
        ];
        for builder in cases {
            assert!(matches!(
                builder.build(),
                Err(ConfigError::ConstraintViolation { .. })
            ));
        }
    }
}
