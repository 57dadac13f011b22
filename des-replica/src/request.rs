//! Requests and the feedback replicas piggyback on completions

use crate::replica::ReplicaId;
use des_core::sync::OneShot;
use des_core::{Monitor, SimTime};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for requests, including shadow reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Next identifier from the process-wide counter.
    pub fn next() -> Self {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request({})", self.0)
    }
}

/// What a replica reports when it finishes a request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub service_time: Duration,
    /// Time spent queued at the replica before service started.
    pub wait_time: Duration,
    /// Requests still waiting at the replica right after this one finished.
    pub queue_size_after: usize,
}

/// Feedback plus the round trip the client observed for the same request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub service_time: Duration,
    pub wait_time: Duration,
    pub queue_size_after: usize,
    pub response_time: Duration,
}

impl FeedbackEntry {
    pub fn new(feedback: Feedback, response_time: Duration) -> Self {
        Self {
            service_time: feedback.service_time,
            wait_time: feedback.wait_time,
            queue_size_after: feedback.queue_size_after,
            response_time,
        }
    }

    /// Round trip minus time spent at the replica, in seconds. May be negative when
    /// the two network legs were sampled independently.
    pub fn two_way_network(&self) -> f64 {
        self.response_time.as_secs_f64() - (self.service_time + self.wait_time).as_secs_f64()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Primary,
    /// Best-effort duplicate of `of`, sent to another member of its candidate set.
    ShadowRead { of: RequestId },
}

/// A unit of client work.
///
/// Clones share the completion latch, which is how the replica hands feedback back to
/// the client that sent the request.
#[derive(Debug, Clone)]
pub struct Request {
    id: RequestId,
    created_at: SimTime,
    kind: RequestKind,
    destination: Option<ReplicaId>,
    completion: OneShot<Feedback>,
    latency_sink: Option<Monitor>,
}

impl Request {
    pub fn new(created_at: SimTime) -> Self {
        Self {
            id: RequestId::next(),
            created_at,
            kind: RequestKind::Primary,
            destination: None,
            completion: OneShot::new(),
            latency_sink: None,
        }
    }

    /// Report `now - created_at` to `sink` when the request completes.
    pub fn with_latency_sink(mut self, sink: Monitor) -> Self {
        self.latency_sink = Some(sink);
        self
    }

    /// Shadow reads never report terminal latency.
    pub(crate) fn shadow_of(primary: RequestId, created_at: SimTime) -> Self {
        Self {
            id: RequestId::next(),
            created_at,
            kind: RequestKind::ShadowRead { of: primary },
            destination: None,
            completion: OneShot::new(),
            latency_sink: None,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn created_at(&self) -> SimTime {
        self.created_at
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn is_shadow_read(&self) -> bool {
        matches!(self.kind, RequestKind::ShadowRead { .. })
    }

    /// Replica the request was sent to, once dispatched.
    pub fn destination(&self) -> Option<ReplicaId> {
        self.destination
    }

    pub(crate) fn set_destination(&mut self, replica: ReplicaId) {
        self.destination = Some(replica);
    }

    pub fn latency_sink(&self) -> Option<&Monitor> {
        self.latency_sink.as_ref()
    }

    pub fn completion(&self) -> &OneShot<Feedback> {
        &self.completion
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_fired()
    }

    /// Fire the completion latch. A second completion is rejected.
    pub fn complete(&self, feedback: Feedback) -> Result<(), Feedback> {
        self.completion.fire(feedback)
    }
}
