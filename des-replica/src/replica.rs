//! Replica server model
//!
//! A [`ReplicaServer`] is a DES component with a fixed number of workers and a FIFO
//! wait queue. When a request finishes it fires the request's completion latch with
//! the service time, the time the request spent waiting, and the queue length left
//! behind. Clients only ever see a replica through its [`ReplicaHandle`].

use crate::config::ReplicaConfig;
use crate::error::ConfigError;
use crate::request::{Feedback, Request, RequestId};
use des_core::dists::{
    ConstantServiceTime, ExponentialDistribution, ServiceTimeDistribution, UniformDistribution,
};
use des_core::{Component, Key, Scheduler, SimError, SimTime, Simulation};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Position of a replica in the pool. Clients index their per-replica tables with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(pub usize);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica-{}", self.0)
    }
}

/// What a client knows about a replica.
#[derive(Debug, Clone)]
pub struct ReplicaHandle {
    id: ReplicaId,
    mean_service_time: Duration,
    queue_depth: Arc<AtomicUsize>,
    key: Key<ReplicaEvent>,
}

impl ReplicaHandle {
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Advertised mean service time.
    pub fn mean_service_time(&self) -> Duration {
        self.mean_service_time
    }

    /// Live occupancy: requests in service plus requests waiting. Only oracle-style
    /// selection reads this.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn key(&self) -> Key<ReplicaEvent> {
        self.key
    }
}

#[derive(Debug, Clone)]
pub enum ReplicaEvent {
    /// A request reached the replica.
    Arrive { request: Request },
    /// A worker finished the given request.
    Finish { request: RequestId },
}

/// Service time model, in a form that can live in experiment files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceModel {
    Constant { time: Duration },
    Exponential { mean: Duration },
    Uniform { min: Duration, max: Duration },
}

impl ServiceModel {
    pub fn build(&self, seed: u64) -> Result<Box<dyn ServiceTimeDistribution>, SimError> {
        Ok(match *self {
            ServiceModel::Constant { time } => Box::new(ConstantServiceTime::new(time)),
            ServiceModel::Exponential { mean } => Box::new(ExponentialDistribution::with_mean(mean, seed)?),
            ServiceModel::Uniform { min, max } => Box::new(UniformDistribution::new(min, max, seed)?),
        })
    }
}

struct InService {
    request: Request,
    arrived_at: SimTime,
    started_at: SimTime,
    service_time: Duration,
}

/// Replica with `workers` parallel servers in front of one FIFO queue.
pub struct ReplicaServer {
    id: ReplicaId,
    workers: usize,
    service: Box<dyn ServiceTimeDistribution>,
    waiting: VecDeque<(Request, SimTime)>,
    in_service: HashMap<RequestId, InService>,
    queue_depth: Arc<AtomicUsize>,
    /// Arrival order of every request, for inspection after a run.
    pub arrivals: Vec<RequestId>,
    pub requests_served: u64,
}

impl ReplicaServer {
    pub fn new(id: ReplicaId, workers: usize, service: Box<dyn ServiceTimeDistribution>) -> Self {
        Self {
            id,
            workers: workers.max(1),
            service,
            waiting: VecDeque::new(),
            in_service: HashMap::new(),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            arrivals: Vec::new(),
            requests_served: 0,
        }
    }

    /// Add the replica to the simulation.
    pub fn install(self, sim: &mut Simulation) -> ReplicaHandle {
        let id = self.id;
        let mean_service_time = self.service.mean();
        let queue_depth = Arc::clone(&self.queue_depth);
        let key = sim.add_component(self);
        debug!(replica = %id, ?mean_service_time, "Installed replica");
        ReplicaHandle {
            id,
            mean_service_time,
            queue_depth,
            key,
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn busy_workers(&self) -> usize {
        self.in_service.len()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    fn start(
        &mut self,
        request: Request,
        arrived_at: SimTime,
        self_id: Key<ReplicaEvent>,
        scheduler: &mut Scheduler,
    ) {
        let service_time = self.service.sample();
        let id = request.id();
        trace!(replica = %self.id, request = %id, ?service_time, "Service started");
        self.in_service.insert(
            id,
            InService {
                request,
                arrived_at,
                started_at: scheduler.time(),
                service_time,
            },
        );
        scheduler.schedule(
            SimTime::from_duration(service_time),
            self_id,
            ReplicaEvent::Finish { request: id },
        );
    }
}

impl Component for ReplicaServer {
    type Event = ReplicaEvent;

    fn process_event(
        &mut self,
        self_id: Key<Self::Event>,
        event: &Self::Event,
        scheduler: &mut Scheduler,
    ) {
        match event {
            ReplicaEvent::Arrive { request } => {
                self.arrivals.push(request.id());
                self.queue_depth.fetch_add(1, Ordering::Relaxed);
                if self.in_service.len() < self.workers {
                    self.start(request.clone(), scheduler.time(), self_id, scheduler);
                } else {
                    self.waiting.push_back((request.clone(), scheduler.time()));
                }
            }
            ReplicaEvent::Finish { request } => {
                let Some(done) = self.in_service.remove(request) else {
                    warn!(replica = %self.id, request = %request, "Finish for unknown request");
                    return;
                };
                self.queue_depth.fetch_sub(1, Ordering::Relaxed);
                self.requests_served += 1;

                let feedback = Feedback {
                    service_time: done.service_time,
                    wait_time: done.started_at - done.arrived_at,
                    queue_size_after: self.waiting.len(),
                };
                if done.request.complete(feedback).is_err() {
                    warn!(replica = %self.id, request = %request, "Request completed twice");
                }

                if let Some((next, arrived_at)) = self.waiting.pop_front() {
                    self.start(next, arrived_at, self_id, scheduler);
                }
            }
        }
    }
}

/// Install a pool of replicas with ids `0..config.count`.
pub fn install_pool(sim: &mut Simulation, config: &ReplicaConfig) -> Result<Vec<ReplicaHandle>, ConfigError> {
    config.validate()?;
    (0..config.count)
        .map(|i| {
            let service = config.service.build(config.seed.wrapping_add(i as u64))?;
            Ok(ReplicaServer::new(ReplicaId(i), config.workers, service).install(sim))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use des_core::{defer_wake, Execute, Executor};

    fn constant_replica(sim: &mut Simulation, workers: usize, ms: u64) -> ReplicaHandle {
        ReplicaServer::new(
            ReplicaId(0),
            workers,
            Box::new(ConstantServiceTime::new(Duration::from_millis(ms))),
        )
        .install(sim)
    }

    #[test]
    fn test_single_worker_queues_fifo_and_reports_feedback() {
        let mut sim = Simulation::default();
        let handle = constant_replica(&mut sim, 1, 10);
        assert_eq!(handle.mean_service_time(), Duration::from_millis(10));

        let requests: Vec<Request> = (0..3).map(|_| Request::new(SimTime::zero())).collect();
        for r in &requests {
            defer_wake(handle.key(), ReplicaEvent::Arrive { request: r.clone() });
        }
        Executor::timed(SimTime::from_millis(5)).execute(&mut sim);
        assert_eq!(handle.queue_depth(), 3);

        Executor::unbound().execute(&mut sim);
        assert_eq!(handle.queue_depth(), 0);

        let feedback: Vec<Feedback> = requests.iter().map(|r| r.completion().peek().unwrap()).collect();
        assert_eq!(feedback[0].wait_time, Duration::ZERO);
        assert_eq!(feedback[0].queue_size_after, 2);
        assert_eq!(feedback[1].wait_time, Duration::from_millis(10));
        assert_eq!(feedback[2].wait_time, Duration::from_millis(20));
        assert_eq!(feedback[2].queue_size_after, 0);

        let server: ReplicaServer = sim.remove_component(handle.key()).unwrap();
        assert_eq!(server.requests_served, 3);
        assert_eq!(server.arrivals, requests.iter().map(Request::id).collect::<Vec<_>>());
    }

    #[test]
    fn test_parallel_workers() {
        let mut sim = Simulation::default();
        let handle = constant_replica(&mut sim, 2, 10);
        let requests: Vec<Request> = (0..2).map(|_| Request::new(SimTime::zero())).collect();
        for r in &requests {
            defer_wake(handle.key(), ReplicaEvent::Arrive { request: r.clone() });
        }
        Executor::unbound().execute(&mut sim);
        assert!(requests
            .iter()
            .all(|r| r.completion().peek().unwrap().wait_time == Duration::ZERO));
        assert_eq!(sim.time(), SimTime::from_millis(10));
    }

    #[test]
    fn test_install_pool() {
        let mut sim = Simulation::default();
        let pool = install_pool(&mut sim, &ReplicaConfig::default()).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool[2].id(), ReplicaId(2));
        assert!(pool.iter().all(|h| h.mean_service_time() == Duration::from_millis(4)));

        let bad = ReplicaConfig {
            service: ServiceModel::Exponential { mean: Duration::ZERO },
            ..ReplicaConfig::default()
        };
        assert!(matches!(
            install_pool(&mut sim, &bad),
            Err(ConfigError::Distribution(_))
        ));
    }
}
