//! The dispatching client
//!
//! A [`Client`] turns each scheduled request into a candidate set of replicas, ranks
//! the set with its [`SelectionStrategy`], and sends the request to the best replica,
//! either directly or through a per-replica [`AdmissionController`] when backpressure
//! is enabled. Every send spawns a completion task that waits for the replica's
//! feedback, accounts for the return trip, and updates the per-replica state the
//! strategies rank by.
//!
//! # Example
//!
//! ```rust,no_run
//! use des_core::async_runtime::DesRuntime;
//! use des_core::{Execute, Executor, SimTime, Simulation};
//! use des_replica::config::{ClientConfig, ReplicaConfig};
//! use des_replica::replica::install_pool;
//! use des_replica::{Client, Request};
//!
//! let mut sim = Simulation::default();
//! let runtime = DesRuntime::install(&mut sim);
//! let pool = install_pool(&mut sim, &ReplicaConfig::default()).unwrap();
//! let config = ClientConfig::builder().strategy_name("expDelay").build().unwrap();
//! let client = Client::new("client-0", config, pool, &runtime, sim.clock()).unwrap();
//!
//! client.schedule(Request::new(sim.time()));
//! Executor::timed(SimTime::from_secs(1)).execute(&mut sim);
//! assert_eq!(client.completions(), 1);
//! ```

use crate::adapter::{build_adapter, AdmissionSnapshot, RateAdapter};
use crate::admission::{AdmissionController, AdmissionDispatch, BacklogEntry, ControllerState};
use crate::config::{AccessPattern, AdmissionPolicy, ClientConfig};
use crate::error::{ConfigError, InvariantViolation};
use crate::estimator::{expected_delay, FeedbackWindow};
use crate::replica::{ReplicaHandle, ReplicaId};
use crate::request::{Feedback, FeedbackEntry, Request, RequestId};
use crate::selection::{rank, ReplicaView, SelectionStrategy};
use crate::transport::{SimTransport, Transport};
use des_core::async_runtime::{sim_sleep, RuntimeHandle};
use des_core::dists::{NetworkLatency, ZipfIndex};
use des_core::{ClockRef, Monitor, SimTime};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Snapshot of one dispatch, taken just before the request is sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchDecision {
    pub request: RequestId,
    pub at: SimTime,
    pub candidates: Vec<ReplicaId>,
    pub ranked: Vec<ReplicaId>,
    pub chosen: ReplicaId,
    /// This client's pending count for each candidate, in candidate order.
    pub pending: Vec<usize>,
}

/// Per-replica bookkeeping of one client.
struct DispatchState {
    pending: Vec<usize>,
    sends: Vec<u64>,
    completed: Vec<u64>,
    pending_x_service: Vec<f64>,
    last_response_time: Vec<f64>,
    feedback: Vec<FeedbackWindow>,
    mu_max: f64,
    sent_at: HashMap<RequestId, SimTime>,
    arrived_at: HashMap<RequestId, SimTime>,
    last_decision: Option<DispatchDecision>,
    decisions: Vec<DispatchDecision>,
    requests_dispatched: u64,
    shadow_reads_sent: u64,
    completions: u64,
}

impl DispatchState {
    fn new(replicas: usize, window: usize) -> Self {
        Self {
            pending: vec![0; replicas],
            sends: vec![0; replicas],
            completed: vec![0; replicas],
            pending_x_service: vec![0.0; replicas],
            last_response_time: vec![0.0; replicas],
            feedback: (0..replicas).map(|_| FeedbackWindow::new(window)).collect(),
            mu_max: 0.0,
            sent_at: HashMap::new(),
            arrived_at: HashMap::new(),
            last_decision: None,
            decisions: Vec::new(),
            requests_dispatched: 0,
            shadow_reads_sent: 0,
            completions: 0,
        }
    }

    /// Largest mean reported service time over all replicas, in seconds.
    fn recompute_mu_max(&mut self) -> f64 {
        self.mu_max = self
            .feedback
            .iter()
            .map(|w| w.mean_service_time().map_or(0.0, |d| d.as_secs_f64()))
            .fold(0.0, f64::max);
        self.mu_max
    }
}

/// Scores read by the selection strategies.
struct View<'a> {
    state: &'a DispatchState,
    replicas: &'a [ReplicaHandle],
    queue_size_feedback: bool,
}

impl ReplicaView for View<'_> {
    fn pending(&self, replica: ReplicaId) -> usize {
        self.state.pending[replica.0]
    }

    fn pending_x_service(&self, replica: ReplicaId) -> f64 {
        self.state.pending_x_service[replica.0]
    }

    fn last_response_time(&self, replica: ReplicaId) -> f64 {
        self.state.last_response_time[replica.0]
    }

    fn expected_delay(&self, replica: ReplicaId) -> f64 {
        expected_delay(
            &self.state.feedback[replica.0],
            self.state.pending[replica.0],
            self.queue_size_feedback,
        )
    }

    fn oracle_load(&self, replica: ReplicaId) -> f64 {
        let handle = &self.replicas[replica.0];
        (1 + handle.queue_depth()) as f64 * handle.mean_service_time().as_secs_f64()
    }
}

struct ClientInner {
    name: String,
    config: ClientConfig,
    replicas: Vec<ReplicaHandle>,
    transport: Box<dyn Transport>,
    latency: NetworkLatency,
    zipf: ZipfIndex,
    runtime: RuntimeHandle,
    clock: ClockRef,
    controllers: Vec<Rc<AdmissionController>>,
    adapter: RefCell<Box<dyn RateAdapter>>,
    rng: RefCell<ChaCha8Rng>,
    state: RefCell<DispatchState>,
    pending_monitor: Monitor,
    response_monitor: Monitor,
}

impl ClientInner {
    fn now(&self) -> SimTime {
        self.clock.time()
    }

    fn network_delay(&self) -> Duration {
        self.latency.sample(&mut *self.rng.borrow_mut())
    }

    fn rank(&self, candidates: &[ReplicaId]) -> Vec<ReplicaId> {
        let state = self.state.borrow();
        let view = View {
            state: &state,
            replicas: &self.replicas,
            queue_size_feedback: self.config.queue_size_feedback,
        };
        rank(self.config.strategy, candidates, &view, &mut *self.rng.borrow_mut())
    }

    fn first_replica(&self) -> usize {
        let n = self.replicas.len();
        let mut rng = self.rng.borrow_mut();
        match self.config.access_pattern {
            AccessPattern::Uniform => rng.gen_range(0..n),
            AccessPattern::Zipfian => self.zipf.sample(&mut *rng, n),
        }
    }

    fn record_decision(&self, request: RequestId, candidates: &[ReplicaId], ranked: Vec<ReplicaId>, chosen: ReplicaId) {
        let mut state = self.state.borrow_mut();
        let decision = DispatchDecision {
            request,
            at: self.now(),
            candidates: candidates.to_vec(),
            ranked,
            chosen,
            pending: candidates.iter().map(|r| state.pending[r.0]).collect(),
        };
        debug!(
            client = %self.name,
            request = %request,
            chosen = %chosen,
            ranked = ?decision.ranked,
            "Dispatch decision"
        );
        if self.config.record_decisions {
            state.decisions.push(decision.clone());
        }
        state.last_decision = Some(decision);
    }

    /// Send without any suspension point: delivery, completion task, then bookkeeping.
    fn send_request(self: &Rc<Self>, mut request: Request, replica: ReplicaId) {
        let delay = self.network_delay();
        request.set_destination(replica);
        self.transport.deliver(request.clone(), &self.replicas[replica.0], delay);
        self.runtime.spawn(await_completion(Rc::clone(self), request.clone(), replica));

        let now = self.now();
        let mut state = self.state.borrow_mut();
        let r = replica.0;
        state.pending[r] += 1;
        state.sends[r] += 1;
        state.pending_x_service[r] =
            (1 + state.pending[r]) as f64 * self.replicas[r].mean_service_time().as_secs_f64();
        self.pending_monitor.observe(now, replica.to_string(), state.pending[r] as f64);
        state.sent_at.insert(request.id(), now);

        let kind = if request.is_shadow_read() {
            state.shadow_reads_sent += 1;
            "shadow"
        } else {
            state.requests_dispatched += 1;
            "primary"
        };
        metrics::counter!("replica_client_requests_sent", "client" => self.name.clone(), "kind" => kind)
            .increment(1);
        trace!(
            client = %self.name,
            request = %request.id(),
            %replica,
            pending = state.pending[r],
            ?delay,
            "Sent request"
        );
    }

    fn maybe_send_shadow_reads(self: &Rc<Self>, primary: RequestId, chosen: ReplicaId, candidates: &[ReplicaId]) {
        let draw: f64 = self.rng.borrow_mut().gen();
        if draw >= self.config.shadow_read_ratio {
            return;
        }
        for &replica in candidates.iter().filter(|r| **r != chosen) {
            let now = self.now();
            let shadow = Request::shadow_of(primary, now);
            self.state.borrow_mut().arrived_at.insert(shadow.id(), now);
            self.send_request(shadow, replica);
        }
    }

    fn broadcast_relief(&self) {
        if self.controllers.is_empty() {
            return;
        }
        let mut order: Vec<usize> = (0..self.controllers.len()).collect();
        order.shuffle(&mut *self.rng.borrow_mut());
        for i in order {
            self.controllers[i].relieve();
        }
    }

    /// Completion bookkeeping, run one network delay after the replica finished.
    fn complete(&self, request: &Request, replica: ReplicaId, feedback: Feedback) {
        let now = self.now();
        let r = replica.0;
        let mut state = self.state.borrow_mut();

        let Some(sent_at) = state.sent_at.remove(&request.id()) else {
            InvariantViolation::UntrackedCompletion {
                request: request.id(),
                replica,
            }
            .raise(&self.name)
        };
        state.arrived_at.remove(&request.id());
        if state.pending[r] == 0 {
            InvariantViolation::NegativePending {
                request: request.id(),
                replica,
            }
            .raise(&self.name);
        }
        state.pending[r] -= 1;
        state.completed[r] += 1;
        let pending = state.pending[r];
        state.pending_x_service[r] = (1 + pending) as f64 * self.replicas[r].mean_service_time().as_secs_f64();
        self.pending_monitor.observe(now, replica.to_string(), pending as f64);

        let response_time = now - sent_at;
        state.last_response_time[r] = response_time.as_secs_f64();
        self.response_monitor
            .observe(now, replica.to_string(), response_time.as_secs_f64());
        state.feedback[r].push(FeedbackEntry::new(feedback, response_time));
        state.completions += 1;

        if self.config.backpressure {
            let mu_max = state.recompute_mu_max();
            let delay = expected_delay(&state.feedback[r], pending, self.config.queue_size_feedback);
            drop(state);
            self.adapter.borrow_mut().adapt(replica, mu_max, delay, pending);
            debug!(
                client = %self.name,
                %replica,
                mu_max,
                expected_delay = delay,
                admission = ?self.adapter.borrow().snapshot(replica),
                "Adapted admission"
            );
            self.broadcast_relief();
        } else {
            drop(state);
        }

        trace!(client = %self.name, request = %request.id(), %replica, ?response_time, "Request completed");
        if !request.is_shadow_read() {
            if let Some(sink) = request.latency_sink() {
                sink.observe(now, self.name.clone(), (now - request.created_at()).as_secs_f64());
            }
        }
    }
}

impl AdmissionDispatch for ClientInner {
    fn admissible(&self, candidates: &[ReplicaId]) -> (Vec<ReplicaId>, Option<ReplicaId>) {
        let ranked = self.rank(candidates);
        let state = self.state.borrow();
        let adapter = self.adapter.borrow();
        let admitted = ranked
            .iter()
            .copied()
            .find(|r| adapter.try_acquire(*r, state.pending[r.0]));
        (ranked, admitted)
    }

    fn admit(self: &Rc<Self>, entry: BacklogEntry, ranked: Vec<ReplicaId>, replica: ReplicaId) {
        let BacklogEntry { request, candidates } = entry;
        let id = request.id();
        self.record_decision(id, &candidates, ranked, replica);
        self.send_request(request, replica);
        self.maybe_send_shadow_reads(id, replica, &candidates);
        self.adapter.borrow_mut().on_send(replica);
    }
}

async fn await_completion(client: Rc<ClientInner>, request: Request, replica: ReplicaId) {
    let feedback = request.completion().wait().await;
    let delay = client.network_delay();
    sim_sleep(delay).await;
    client.complete(&request, replica, feedback);
}

async fn refill_tokens(client: Rc<ClientInner>, replica: ReplicaId) {
    loop {
        let period = client.adapter.borrow().refill_period(replica);
        let Some(period) = period else {
            return;
        };
        sim_sleep(period).await;
        client.adapter.borrow_mut().refill(replica);
        client.broadcast_relief();
    }
}

/// A request dispatcher bound to one replica pool.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Client {
    inner: Rc<ClientInner>,
}

impl Client {
    /// Create a client that delivers through [`SimTransport`].
    ///
    /// `replicas[i]` must have id `ReplicaId(i)`. With backpressure enabled, one
    /// admission controller task per replica is spawned on `runtime`, plus one token
    /// refill task per replica under the token-bucket policy. Those tasks never finish,
    /// so such simulations have to run with a time bound.
    pub fn new(
        name: impl Into<String>,
        config: ClientConfig,
        replicas: Vec<ReplicaHandle>,
        runtime: &RuntimeHandle,
        clock: ClockRef,
    ) -> Result<Self, ConfigError> {
        Self::with_transport(name, config, replicas, runtime, clock, SimTransport)
    }

    pub fn with_transport(
        name: impl Into<String>,
        config: ClientConfig,
        replicas: Vec<ReplicaHandle>,
        runtime: &RuntimeHandle,
        clock: ClockRef,
        transport: impl Transport + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if replicas.is_empty() {
            return Err(ConfigError::EmptyReplicaPool);
        }
        if replicas.iter().enumerate().any(|(i, h)| h.id() != ReplicaId(i)) {
            return Err(ConfigError::ConstraintViolation {
                field: "replicas".to_string(),
                constraint: "ordered by replica id, starting at 0".to_string(),
            });
        }
        let net = config.network;
        let latency = NetworkLatency::new(net.base, net.jitter_mean, net.jitter_std_dev)?;
        let zipf = ZipfIndex::new(2.0)?;

        let name = name.into();
        let n = replicas.len();
        let controllers = if config.backpressure {
            (0..n).map(|i| Rc::new(AdmissionController::new(ReplicaId(i)))).collect()
        } else {
            Vec::new()
        };

        let inner = Rc::new(ClientInner {
            pending_monitor: Monitor::new(format!("{name}_pending_requests")),
            response_monitor: Monitor::new(format!("{name}_response_time")),
            adapter: RefCell::new(build_adapter(&config, n)),
            rng: RefCell::new(ChaCha8Rng::seed_from_u64(config.seed)),
            state: RefCell::new(DispatchState::new(n, config.feedback_window)),
            name,
            config,
            replicas,
            transport: Box::new(transport),
            latency,
            zipf,
            runtime: runtime.clone(),
            clock,
            controllers,
        });

        for controller in &inner.controllers {
            runtime.spawn(Rc::clone(controller).run(Rc::clone(&inner)));
        }
        if inner.config.backpressure && inner.config.admission == AdmissionPolicy::TokenBucket {
            for i in 0..n {
                runtime.spawn(refill_tokens(Rc::clone(&inner), ReplicaId(i)));
            }
        }

        info!(
            client = %inner.name,
            strategy = %inner.config.strategy,
            replicas = n,
            replication_factor = inner.config.replication_factor,
            backpressure = inner.config.backpressure,
            admission = %inner.config.admission,
            "Created client"
        );
        Ok(Self { inner })
    }

    /// Dispatch a request.
    ///
    /// The candidate set is `replication_factor` consecutive replicas starting at a
    /// uniformly or zipf-chosen index, wrapping around the pool.
    pub fn schedule(&self, request: Request) {
        let inner = &self.inner;
        let n = inner.replicas.len();
        let first = inner.first_replica();
        let candidates: Vec<ReplicaId> = (0..inner.config.replication_factor)
            .map(|i| ReplicaId((first + i) % n))
            .collect();
        inner.state.borrow_mut().arrived_at.insert(request.id(), inner.now());

        if inner.config.backpressure {
            inner.controllers[first].enqueue(request, candidates);
            return;
        }

        let ranked = inner.rank(&candidates);
        let chosen = ranked[0];
        let id = request.id();
        inner.record_decision(id, &candidates, ranked, chosen);
        inner.send_request(request, chosen);
        inner.maybe_send_shadow_reads(id, chosen, &candidates);
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.inner.config.strategy
    }

    pub fn replicas(&self) -> &[ReplicaHandle] {
        &self.inner.replicas
    }

    pub fn pending_count(&self, replica: ReplicaId) -> usize {
        self.inner.state.borrow().pending[replica.0]
    }

    /// `(1 + pending) * mean service time`, in seconds.
    pub fn pending_x_service(&self, replica: ReplicaId) -> f64 {
        self.inner.state.borrow().pending_x_service[replica.0]
    }

    /// Most recent response time from `replica`, in seconds.
    pub fn last_response_time(&self, replica: ReplicaId) -> f64 {
        self.inner.state.borrow().last_response_time[replica.0]
    }

    pub fn feedback_len(&self, replica: ReplicaId) -> usize {
        self.inner.state.borrow().feedback[replica.0].len()
    }

    /// Current expected delay of `replica`, in seconds.
    pub fn expected_delay(&self, replica: ReplicaId) -> f64 {
        let state = self.inner.state.borrow();
        expected_delay(
            &state.feedback[replica.0],
            state.pending[replica.0],
            self.inner.config.queue_size_feedback,
        )
    }

    /// Cluster-wide service time ceiling as of the last completion, in seconds.
    pub fn mu_max(&self) -> f64 {
        self.inner.state.borrow().mu_max
    }

    /// Requests sent but not yet completed, shadow reads included.
    pub fn in_flight(&self) -> usize {
        self.inner.state.borrow().sent_at.len()
    }

    /// Requests scheduled or shadowed whose completion has not been processed.
    pub fn outstanding(&self) -> usize {
        self.inner.state.borrow().arrived_at.len()
    }

    pub fn requests_dispatched(&self) -> u64 {
        self.inner.state.borrow().requests_dispatched
    }

    pub fn shadow_reads_sent(&self) -> u64 {
        self.inner.state.borrow().shadow_reads_sent
    }

    pub fn completions(&self) -> u64 {
        self.inner.state.borrow().completions
    }

    /// Requests this client sent to `replica`, shadow reads included.
    pub fn sends_to(&self, replica: ReplicaId) -> u64 {
        self.inner.state.borrow().sends[replica.0]
    }

    /// Completions from `replica` whose bookkeeping has run.
    pub fn completions_from(&self, replica: ReplicaId) -> u64 {
        self.inner.state.borrow().completed[replica.0]
    }

    pub fn last_decision(&self) -> Option<DispatchDecision> {
        self.inner.state.borrow().last_decision.clone()
    }

    /// Every dispatch decision, if the client was configured to record them.
    pub fn decisions(&self) -> Vec<DispatchDecision> {
        self.inner.state.borrow().decisions.clone()
    }

    pub fn controller_state(&self, entry: ReplicaId) -> Option<ControllerState> {
        self.inner.controllers.get(entry.0).map(|c| c.state())
    }

    pub fn backlog_len(&self, entry: ReplicaId) -> usize {
        self.inner.controllers.get(entry.0).map_or(0, |c| c.backlog_len())
    }

    pub fn controller_dispatched(&self, entry: ReplicaId) -> u64 {
        self.inner.controllers.get(entry.0).map_or(0, |c| c.dispatched())
    }

    pub fn admission_snapshot(&self, replica: ReplicaId) -> AdmissionSnapshot {
        self.inner.adapter.borrow().snapshot(replica)
    }

    /// Override the admission limit of `replica` (tokens or threshold) and broadcast
    /// congestion relief.
    pub fn set_admission_limit(&self, replica: ReplicaId, limit: u32) {
        self.inner.adapter.borrow_mut().set_limit(replica, limit);
        debug!(client = %self.inner.name, %replica, limit, "Admission limit overridden");
        self.inner.broadcast_relief();
    }

    /// Pending count per replica after every send and completion.
    pub fn pending_monitor(&self) -> &Monitor {
        &self.inner.pending_monitor
    }

    /// Response time per replica, in seconds.
    pub fn response_monitor(&self) -> &Monitor {
        &self.inner.response_monitor
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("strategy", &self.inner.config.strategy)
            .field("pending", &state.pending)
            .field("completions", &state.completions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkConfig, TokenBucketConfig};
    use crate::replica::{ReplicaEvent, ReplicaServer};
    use des_core::async_runtime::DesRuntime;
    use des_core::dists::ConstantServiceTime;
    use des_core::{Execute, Executor, Simulation};

    fn constant_pool(sim: &mut Simulation, service_ms: &[u64]) -> Vec<ReplicaHandle> {
        service_ms
            .iter()
            .enumerate()
            .map(|(i, ms)| {
                ReplicaServer::new(
                    ReplicaId(i),
                    1,
                    Box::new(ConstantServiceTime::new(Duration::from_millis(*ms))),
                )
                .install(sim)
            })
            .collect()
    }

    fn fixed_network() -> NetworkConfig {
        NetworkConfig {
            base: Duration::from_millis(1),
            jitter_mean: Duration::ZERO,
            jitter_std_dev: Duration::ZERO,
        }
    }

    #[test]
    fn test_constructor_rejects_bad_pools() {
        let mut sim = Simulation::default();
        let runtime = DesRuntime::install(&mut sim);
        let err = Client::new("c", ClientConfig::default(), Vec::new(), &runtime, sim.clock()).unwrap_err();
        assert_eq!(err, ConfigError::EmptyReplicaPool);

        let mut pool = constant_pool(&mut sim, &[1, 1]);
        pool.swap(0, 1);
        assert!(matches!(
            Client::new("c", ClientConfig::default(), pool, &runtime, sim.clock()),
            Err(ConfigError::ConstraintViolation { .. })
        ));

        let pool = constant_pool(&mut sim, &[1]);
        let config = ClientConfig {
            network: NetworkConfig {
                jitter_std_dev: Duration::ZERO,
                ..NetworkConfig::default()
            },
            ..ClientConfig::default()
        };
        assert!(Client::new("c", config, pool, &runtime, sim.clock()).is_ok());
    }

    #[test]
    fn test_constructor_rejects_admission_that_never_starts() {
        let mut sim = Simulation::default();
        let runtime = DesRuntime::install(&mut sim);

        let zero_threshold = ClientConfig {
            backpressure: true,
            admission: AdmissionPolicy::AdaptiveThreshold,
            initial_threshold: 0.0,
            ..ClientConfig::default()
        };
        let pool = constant_pool(&mut sim, &[1, 1, 1]);
        assert!(matches!(
            Client::new("c", zero_threshold, pool, &runtime, sim.clock()),
            Err(ConfigError::ConstraintViolation { field, .. }) if field == "initial_threshold"
        ));

        let endless_refill = ClientConfig {
            backpressure: true,
            admission: AdmissionPolicy::TokenBucket,
            token_bucket: TokenBucketConfig {
                initial_alpha: f64::INFINITY,
                ..TokenBucketConfig::default()
            },
            ..ClientConfig::default()
        };
        let pool = constant_pool(&mut sim, &[1, 1, 1]);
        assert!(matches!(
            Client::new("c", endless_refill, pool, &runtime, sim.clock()),
            Err(ConfigError::ConstraintViolation { field, .. }) if field == "token_bucket.initial_alpha"
        ));
    }

    #[test]
    fn test_round_trip_bookkeeping() {
        let mut sim = Simulation::default();
        let runtime = DesRuntime::install(&mut sim);
        let pool = constant_pool(&mut sim, &[4]);
        let config = ClientConfig::builder()
            .replication_factor(1)
            .network(fixed_network())
            .build()
            .unwrap();
        let client = Client::new("c", config, pool, &runtime, sim.clock()).unwrap();
        let sink = Monitor::new("latency");

        client.schedule(Request::new(sim.time()).with_latency_sink(sink.clone()));
        assert_eq!(client.pending_count(ReplicaId(0)), 1);
        assert!((client.pending_x_service(ReplicaId(0)) - 0.008).abs() < 1e-12);
        assert_eq!(client.in_flight(), 1);

        Executor::unbound().execute(&mut sim);

        // 1ms out, 4ms service, 1ms back
        assert_eq!(sim.time(), SimTime::from_millis(6));
        assert_eq!(client.pending_count(ReplicaId(0)), 0);
        assert!((client.pending_x_service(ReplicaId(0)) - 0.004).abs() < 1e-12);
        assert!((client.last_response_time(ReplicaId(0)) - 0.006).abs() < 1e-12);
        assert_eq!(client.feedback_len(ReplicaId(0)), 1);
        // 2ms network + (1 + 0) * 4ms
        assert!((client.expected_delay(ReplicaId(0)) - 0.006).abs() < 1e-9);
        assert_eq!(client.in_flight(), 0);
        assert_eq!(client.outstanding(), 0);
        assert_eq!(sink.values("c"), vec![0.006]);
        assert_eq!(client.pending_monitor().values("replica-0"), vec![1.0, 0.0]);
    }

    #[test]
    fn test_primary_strategy_always_picks_first_candidate() {
        let mut sim = Simulation::default();
        let runtime = DesRuntime::install(&mut sim);
        let pool = constant_pool(&mut sim, &[1, 1, 1, 1]);
        let config = ClientConfig::builder()
            .strategy(SelectionStrategy::Primary)
            .replication_factor(2)
            .record_decisions(true)
            .build()
            .unwrap();
        let client = Client::new("c", config, pool, &runtime, sim.clock()).unwrap();
        for _ in 0..20 {
            client.schedule(Request::new(sim.time()));
        }
        let decisions = client.decisions();
        assert_eq!(decisions.len(), 20);
        for d in &decisions {
            assert_eq!(d.chosen, d.candidates[0]);
            assert_eq!(d.candidates[1].0, (d.candidates[0].0 + 1) % 4);
        }
        assert_eq!(client.last_decision(), decisions.last().cloned());
        Executor::unbound().execute(&mut sim);
        assert_eq!(client.completions(), 20);
    }

    #[test]
    fn test_token_bucket_paces_sends() {
        let mut sim = Simulation::default();
        let runtime = DesRuntime::install(&mut sim);
        let pool = constant_pool(&mut sim, &[1]);
        let config = ClientConfig::builder()
            .replication_factor(1)
            .backpressure(true)
            .token_bucket(TokenBucketConfig {
                initial_alpha: 4.0,
                ..TokenBucketConfig::default()
            })
            .network(fixed_network())
            .build()
            .unwrap();
        let client = Client::new("c", config, pool, &runtime, sim.clock()).unwrap();
        for _ in 0..3 {
            client.schedule(Request::new(sim.time()));
        }

        // No tokens until the first refill at 4ms + 100ns
        Executor::timed(SimTime::from_millis(4)).execute(&mut sim);
        assert_eq!(client.requests_dispatched(), 0);
        assert_eq!(client.controller_state(ReplicaId(0)), Some(ControllerState::Congested));
        assert_eq!(client.backlog_len(ReplicaId(0)), 3);

        Executor::timed(SimTime::from_micros(4_001)).execute(&mut sim);
        assert_eq!(client.requests_dispatched(), 1);
        assert_eq!(client.backlog_len(ReplicaId(0)), 2);

        Executor::timed(SimTime::from_millis(100)).execute(&mut sim);
        assert_eq!(client.requests_dispatched(), 3);
        assert_eq!(client.controller_dispatched(ReplicaId(0)), 3);
        assert_eq!(client.controller_state(ReplicaId(0)), Some(ControllerState::Idle));
        assert!(matches!(
            client.admission_snapshot(ReplicaId(0)),
            AdmissionSnapshot::TokenBucket { alpha, .. } if alpha >= 0.0
        ));
    }

    #[test]
    #[should_panic(expected = "Completion for untracked")]
    fn test_completion_for_untracked_request_panics() {
        let mut sim = Simulation::default();
        let runtime = DesRuntime::install(&mut sim);
        let pool = constant_pool(&mut sim, &[1]);
        let config = ClientConfig::builder().replication_factor(1).build().unwrap();
        let client = Client::new("c", config, pool, &runtime, sim.clock()).unwrap();
        let stray = Request::new(sim.time());
        client.inner.complete(
            &stray,
            ReplicaId(0),
            Feedback {
                service_time: Duration::from_millis(1),
                wait_time: Duration::ZERO,
                queue_size_after: 0,
            },
        );
    }

    #[test]
    fn test_oracle_reads_live_queue_depth() {
        let mut sim = Simulation::default();
        let runtime = DesRuntime::install(&mut sim);
        let pool = constant_pool(&mut sim, &[10, 10]);
        // Load replica 0 behind the client's back
        for _ in 0..3 {
            des_core::defer_wake(
                pool[0].key(),
                ReplicaEvent::Arrive {
                    request: Request::new(SimTime::zero()),
                },
            );
        }
        Executor::timed(SimTime::zero()).execute(&mut sim);
        assert_eq!(pool[0].queue_depth(), 3);

        let config = ClientConfig::builder()
            .strategy(SelectionStrategy::PendingXServiceTimeOracle)
            .replication_factor(2)
            .record_decisions(true)
            .build()
            .unwrap();
        let client = Client::new("c", config, pool, &runtime, sim.clock()).unwrap();
        for _ in 0..5 {
            client.schedule(Request::new(sim.time()));
        }
        assert!(client.decisions().iter().all(|d| d.chosen == ReplicaId(1)));
    }
}
