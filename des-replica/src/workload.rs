//! Open-loop request generation
//!
//! A [`Workload`] task sleeps for each inter-arrival time drawn from its
//! [`ArrivalPattern`], then creates a request that reports its latency to a shared
//! monitor and hands it to the next client in round-robin order. Arrivals do not wait
//! for earlier requests to complete.

use crate::client::Client;
use crate::request::Request;
use des_core::async_runtime::{sim_sleep, RuntimeHandle};
use des_core::dists::ArrivalPattern;
use des_core::{ClockRef, Monitor};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info};

pub struct Workload {
    clients: Vec<Client>,
    arrivals: Box<dyn ArrivalPattern>,
    total: u64,
    latency: Monitor,
}

/// Observes a running workload.
#[derive(Debug, Clone)]
pub struct WorkloadHandle {
    generated: Rc<Cell<u64>>,
    total: u64,
    latency: Monitor,
}

impl WorkloadHandle {
    /// Requests created so far.
    pub fn generated(&self) -> u64 {
        self.generated.get()
    }

    pub fn is_finished(&self) -> bool {
        self.generated.get() >= self.total
    }

    /// End-to-end latency of completed primary requests, in seconds, one series per
    /// client.
    pub fn latency(&self) -> &Monitor {
        &self.latency
    }
}

impl Workload {
    /// Generate `total` requests. `latency` receives each completed request's latency.
    pub fn new(clients: Vec<Client>, arrivals: Box<dyn ArrivalPattern>, total: u64, latency: Monitor) -> Self {
        Self {
            clients,
            arrivals,
            total,
            latency,
        }
    }

    /// Spawn the generator task.
    pub fn start(self, runtime: &RuntimeHandle, clock: ClockRef) -> WorkloadHandle {
        let generated = Rc::new(Cell::new(0));
        let handle = WorkloadHandle {
            generated: Rc::clone(&generated),
            total: self.total,
            latency: self.latency.clone(),
        };
        runtime.spawn(self.run(clock, generated));
        handle
    }

    async fn run(mut self, clock: ClockRef, generated: Rc<Cell<u64>>) {
        if self.clients.is_empty() {
            debug!("Workload has no clients");
            return;
        }
        info!(clients = self.clients.len(), total = self.total, "Workload started");
        for i in 0..self.total {
            sim_sleep(self.arrivals.next_arrival_time()).await;
            let request = Request::new(clock.time()).with_latency_sink(self.latency.clone());
            let client = &self.clients[(i % self.clients.len() as u64) as usize];
            client.schedule(request);
            generated.set(i + 1);
        }
        info!(generated = self.total, at = %clock.time(), "Workload finished");
    }
}
