//! Structured logging for simulation debugging
//!
//! Everything in the workspace logs through `tracing`; this module only installs a
//! subscriber and provides a couple of event helpers.
//!
//! # Controlling output
//!
//! ```rust
//! use des_core::init_simulation_logging_with_level;
//! init_simulation_logging_with_level("debug");
//! ```
//!
//! `RUST_LOG` always wins over the level passed in code:
//!
//! ```bash
//! RUST_LOG=des_replica::admission=trace cargo run --example replica_selection_demo
//! ```
//!
//! Level guidelines used across the crates:
//! - **TRACE**: per-event bookkeeping (pending counters, deferred wakes)
//! - **DEBUG**: dispatch, admission and adaptation decisions
//! - **INFO**: simulation lifecycle
//! - **WARN**: suspicious but recoverable conditions
//! - **ERROR**: broken invariants, right before the panic

use tracing::{debug, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging at INFO with sensible per-module defaults.
pub fn init_simulation_logging() {
    init_simulation_logging_with_level("info")
}

/// Initialize logging with a specific level.
///
/// Installing a subscriber twice is harmless: the second call is ignored, which lets
/// tests call this freely.
pub fn init_simulation_logging_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{level},des_core::scheduler=info,des_core::async_runtime=info").into()
    });

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        info!("Simulation logging initialized at level: {}", level);
    }
}

/// Logging helpers for common simulation events
pub mod events {
    use super::*;

    pub fn component_state_changed(component: &str, old_state: &str, new_state: &str) {
        debug!(component, old_state, new_state, "Component state changed");
    }
}

/// Logging helpers for broken invariants
pub mod diagnostics {
    use super::*;

    /// Logged right before panicking on a broken invariant.
    pub fn invariant_violated(component: &str, description: &str) {
        error!(component, description, "Invariant violated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_initialization_is_idempotent() {
        init_simulation_logging_with_level("debug");
        init_simulation_logging();
        tracing::debug!("Test debug message");
    }

    #[test]
    fn test_event_helpers_log_without_subscriber_setup() {
        events::component_state_changed("controller", "ready", "congested");
        diagnostics::invariant_violated("client-0", "pending count went negative");
    }
}
