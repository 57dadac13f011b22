//! Backlog-driven admission control
//!
//! With backpressure enabled, a client does not send requests directly. Each request is
//! appended to the backlog of the [`AdmissionController`] of its first candidate
//! replica, and the controller's task sends backlogged requests in FIFO order whenever
//! some candidate of the head entry admits one more request. When none does, the whole
//! backlog waits behind the head until congestion relief is broadcast.

use crate::replica::ReplicaId;
use crate::request::Request;
use des_core::logging::events;
use des_core::sync::Signal;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// Backlog empty, waiting for an enqueue.
    Idle,
    /// Backlog non-empty, trying to send the head.
    Ready,
    /// No candidate of the head entry admits, waiting for relief.
    Congested,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControllerState::Idle => "idle",
            ControllerState::Ready => "ready",
            ControllerState::Congested => "congested",
        })
    }
}

#[derive(Debug, Clone)]
pub struct BacklogEntry {
    pub request: Request,
    pub candidates: Vec<ReplicaId>,
}

/// What a controller needs from the client that owns it.
pub(crate) trait AdmissionDispatch {
    /// Rank `candidates` and return the ranking together with the first replica in it
    /// that currently admits a request.
    fn admissible(&self, candidates: &[ReplicaId]) -> (Vec<ReplicaId>, Option<ReplicaId>);

    /// Send an entry to `replica`, consuming one grant.
    fn admit(self: &Rc<Self>, entry: BacklogEntry, ranked: Vec<ReplicaId>, replica: ReplicaId);
}

/// Per-entry-point backlog and its signals.
pub struct AdmissionController {
    entry: ReplicaId,
    backlog: RefCell<VecDeque<BacklogEntry>>,
    state: Cell<ControllerState>,
    backlog_ready: Signal,
    congestion: Signal,
    dispatched: Cell<u64>,
}

impl AdmissionController {
    pub fn new(entry: ReplicaId) -> Self {
        Self {
            entry,
            backlog: RefCell::new(VecDeque::new()),
            state: Cell::new(ControllerState::Idle),
            backlog_ready: Signal::new(),
            congestion: Signal::new(),
            dispatched: Cell::new(0),
        }
    }

    pub fn entry(&self) -> ReplicaId {
        self.entry
    }

    pub fn state(&self) -> ControllerState {
        self.state.get()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.borrow().len()
    }

    /// Requests this controller has sent.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.get()
    }

    /// Append to the backlog tail, waking the controller if it was idle.
    pub fn enqueue(&self, request: Request, candidates: Vec<ReplicaId>) {
        trace!(entry = %self.entry, request = %request.id(), "Backlogged request");
        self.backlog.borrow_mut().push_back(BacklogEntry { request, candidates });
        if self.state.get() == ControllerState::Idle {
            self.backlog_ready.fire();
        }
    }

    /// Congestion relief: a congested controller re-evaluates its head entry.
    pub fn relieve(&self) {
        self.congestion.fire();
    }

    fn transition(&self, next: ControllerState) {
        let previous = self.state.replace(next);
        if previous != next {
            events::component_state_changed(
                &format!("controller[{}]", self.entry),
                &previous.to_string(),
                &next.to_string(),
            );
        }
    }

    /// Controller task. Runs for the lifetime of the simulation.
    pub(crate) async fn run<D: AdmissionDispatch>(self: Rc<Self>, client: Rc<D>) {
        loop {
            let head = self.backlog.borrow().front().map(|e| e.candidates.clone());
            let Some(candidates) = head else {
                self.transition(ControllerState::Idle);
                self.backlog_ready.wait().await;
                continue;
            };

            self.transition(ControllerState::Ready);
            let (ranked, admitted) = client.admissible(&candidates);
            match admitted {
                Some(replica) => {
                    let entry = self.backlog.borrow_mut().pop_front();
                    if let Some(entry) = entry {
                        debug!(
                            entry = %self.entry,
                            request = %entry.request.id(),
                            %replica,
                            backlog = self.backlog_len(),
                            "Admitted request"
                        );
                        self.dispatched.set(self.dispatched.get() + 1);
                        client.admit(entry, ranked, replica);
                    }
                }
                None => {
                    debug!(entry = %self.entry, backlog = self.backlog_len(), "Congested");
                    self.transition(ControllerState::Congested);
                    self.congestion.wait().await;
                }
            }
        }
    }
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("entry", &self.entry)
            .field("state", &self.state.get())
            .field("backlog", &self.backlog_len())
            .field("dispatched", &self.dispatched.get())
            .finish()
    }
}
