//! Delivery of requests from clients to replicas

use crate::replica::{ReplicaEvent, ReplicaHandle};
use crate::request::Request;
use des_core::{defer_schedule, SimTime};
use std::time::Duration;
use tracing::trace;

/// Moves a request to a replica after a delay chosen by the sender.
pub trait Transport {
    fn deliver(&self, request: Request, replica: &ReplicaHandle, delay: Duration);
}

/// Delivers by scheduling an arrival event on the replica component.
///
/// Scheduling goes through the deferred queue, so it works from inside async tasks as
/// well as from plain component code.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTransport;

impl Transport for SimTransport {
    fn deliver(&self, request: Request, replica: &ReplicaHandle, delay: Duration) {
        trace!(request = %request.id(), replica = %replica.id(), ?delay, "Delivering request");
        defer_schedule(
            SimTime::from_duration(delay),
            replica.key(),
            ReplicaEvent::Arrive { request },
        );
    }
}
