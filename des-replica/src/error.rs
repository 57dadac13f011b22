//! Error types for replica selection and admission control

use crate::replica::ReplicaId;
use crate::request::RequestId;
use des_core::SimError;
use thiserror::Error;

/// Errors detected while building a client, before the simulation runs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown replica selection strategy '{0}'")]
    UnknownStrategy(String),

    #[error("Unknown access pattern '{0}' (expected 'uniform' or 'zipfian')")]
    UnknownAccessPattern(String),

    #[error("Unknown admission policy '{0}' (expected 'token_bucket' or 'adaptive_threshold')")]
    UnknownAdmissionPolicy(String),

    #[error("Field '{field}' must be {constraint}")]
    ConstraintViolation { field: String, constraint: String },

    #[error("A client needs at least one replica")]
    EmptyReplicaPool,

    #[error("Invalid distribution parameters: {0}")]
    Distribution(#[from] SimError),
}

/// Broken bookkeeping. These are bugs, never expected conditions, and the simulation
/// panics when it detects one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("Completion for untracked {request} served by {replica}")]
    UntrackedCompletion { request: RequestId, replica: ReplicaId },

    #[error("Pending count for {replica} would go negative on completion of {request}")]
    NegativePending { request: RequestId, replica: ReplicaId },
}

impl InvariantViolation {
    /// Log and abort.
    pub(crate) fn raise(self, component: &str) -> ! {
        des_core::logging::diagnostics::invariant_violated(component, &self.to_string());
        panic!("{self}");
    }
}
