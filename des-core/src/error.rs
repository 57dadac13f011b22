//! Error types for the simulation framework

use thiserror::Error;

/// Top-level error type for simulation operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid distribution parameters for {distribution}: {reason}")]
    Distribution {
        distribution: &'static str,
        reason: String,
    },

    #[error("Time validation error: expected finite non-negative time, got {0}")]
    InvalidTime(f64),

    #[error("Component not found with ID: {id}")]
    ComponentNotFound { id: String },
}

impl SimError {
    pub(crate) fn distribution(distribution: &'static str, reason: impl ToString) -> Self {
        SimError::Distribution {
            distribution,
            reason: reason.to_string(),
        }
    }
}
