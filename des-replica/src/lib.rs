//! Replica selection, admission control and backpressure on top of `des-core`.
//!
//! Clients spread requests over a pool of replicas. For each request a client picks a
//! candidate set of consecutive replicas, ranks it with a [`SelectionStrategy`] fed by
//! the feedback replicas return with every response, and sends the request to the best
//! candidate. With backpressure enabled, requests first wait in per-replica
//! [`admission::AdmissionController`] backlogs and are only sent once a
//! [`adapter::RateAdapter`] grants admission; the adapters tighten or relax their
//! limits after every completion.
//!
//! # Modules
//!
//! - [`client`]: the dispatcher and its completion handling
//! - [`selection`]: ranking strategies
//! - [`estimator`]: feedback window and expected delay
//! - [`admission`], [`adapter`]: backlog and admission state
//! - [`replica`], [`transport`], [`workload`]: the simulated system around a client
//! - [`config`], [`error`]

pub mod adapter;
pub mod admission;
pub mod client;
pub mod config;
pub mod error;
pub mod estimator;
pub mod replica;
pub mod request;
pub mod selection;
pub mod transport;
pub mod workload;

pub use adapter::{AdmissionSnapshot, RateAdapter};
pub use admission::ControllerState;
pub use client::{Client, DispatchDecision};
pub use config::{AccessPattern, AdmissionPolicy, ClientConfig, ClientConfigBuilder, ReplicaConfig};
pub use error::{ConfigError, InvariantViolation};
pub use replica::{ReplicaHandle, ReplicaId, ReplicaServer};
pub use request::{Feedback, Request, RequestId};
pub use selection::SelectionStrategy;
pub use transport::{SimTransport, Transport};
pub use workload::{Workload, WorkloadHandle};
