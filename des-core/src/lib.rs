//! Core discrete event simulation engine.
//!
//! This crate provides the fundamental building blocks for discrete event simulation:
//! time management, event scheduling, an async runtime driven by simulated time, and a
//! component-based architecture.
//!
//! # Architecture Overview
//!
//! - [`Simulation`]: the main entry point that owns the scheduler and components.
//!   Use this to run simulations, add components, and access simulation state.
//! - [`Scheduler`]: a priority queue of timed events. Events with equal timestamps are
//!   delivered in the order they were scheduled.
//! - [`async_runtime`]: a component that polls futures, so that processes can be
//!   written with `async`/`await` and [`async_runtime::sim_sleep`].
//! - [`sync`]: broadcast and one-shot signals for coordination between tasks.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use des_core::{Simulation, SimTime, Executor, Execute};
//! use des_core::async_runtime::{DesRuntime, sim_sleep};
//! use std::time::Duration;
//!
//! let mut simulation = Simulation::default();
//! let runtime = DesRuntime::install(&mut simulation);
//! runtime.spawn(async {
//!     sim_sleep(Duration::from_millis(10)).await;
//! });
//! Executor::timed(SimTime::from_secs(1)).execute(&mut simulation);
//! ```
//!
//! # Time Model
//!
//! All timing uses [`SimTime`], which represents simulation time (not wall-clock time).
//! This ensures deterministic, reproducible behavior across simulation runs.

pub mod async_runtime;
pub mod dists;
pub mod error;
pub mod execute;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod scheduler;
pub mod sync;
pub mod time;
pub mod types;
pub mod waker;

use std::any::Any;
use std::collections::HashMap;
use tracing::{debug, info, instrument, trace, warn};

pub use error::SimError;
pub use execute::{Execute, Executor};
pub use logging::{init_simulation_logging, init_simulation_logging_with_level};
pub use metrics::{Monitor, Observation};
pub use scheduler::{defer_schedule, defer_wake, ClockRef, EventEntry, Scheduler};
pub use time::SimTime;
pub use types::EventId;

use ids::{deterministic_uuid, UUID_DOMAIN_COMPONENT};
use uuid::Uuid;

#[derive(Debug)]
pub struct Key<T> {
    id: Uuid,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Key<T> {
    pub fn new_with_id(id: Uuid) -> Self {
        Self {
            id,
            _marker: std::marker::PhantomData,
        }
    }

    /// Get the UUID of this key
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T> Eq for Key<T> {}

pub trait ProcessEventEntry: Any {
    fn process_event_entry(&mut self, entry: EventEntry, scheduler: &mut Scheduler);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub trait Component: ProcessEventEntry {
    type Event: 'static;

    fn process_event(
        &mut self,
        self_id: Key<Self::Event>,
        event: &Self::Event,
        scheduler: &mut Scheduler,
    );
}

impl<E, C> ProcessEventEntry for C
where
    E: std::fmt::Debug + 'static,
    C: Component<Event = E> + 'static,
{
    fn process_event_entry(&mut self, entry: EventEntry, scheduler: &mut Scheduler) {
        match entry.downcast::<E>() {
            Some(typed_entry) => {
                self.process_event(typed_entry.component_key, typed_entry.event, scheduler);
            }
            None => warn!(
                event_id = %entry.id(),
                expected = std::any::type_name::<E>(),
                "Dropping event with unexpected payload type"
            ),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Container holding type-erased components.
#[derive(Default)]
pub struct Components {
    next_component: u64,
    components: HashMap<Uuid, Box<dyn ProcessEventEntry>>,
}

impl Components {
    /// Process the event on the component given by the event entry.
    pub fn process_event_entry(&mut self, entry: EventEntry, scheduler: &mut Scheduler) {
        if let Some(component) = self.components.get_mut(&entry.component) {
            component.process_event_entry(entry, scheduler);
        } else {
            trace!(event_id = %entry.id(), "Event for removed component ignored");
        }
    }

    /// Registers a new component and returns its ID.
    ///
    /// IDs are derived from a registration counter, so the same sequence of
    /// registrations always yields the same keys.
    #[must_use]
    pub fn register<E: std::fmt::Debug + 'static, C: Component<Event = E> + 'static>(
        &mut self,
        component: C,
    ) -> Key<E> {
        self.next_component += 1;
        let id = deterministic_uuid(0, UUID_DOMAIN_COMPONENT, self.next_component);
        self.components.insert(id, Box::new(component));
        Key::new_with_id(id)
    }

    pub fn remove<E: 'static, C: Component<Event = E> + 'static>(
        &mut self,
        key: Key<E>,
    ) -> Option<C> {
        self.components.remove(&key.id).and_then(|boxed_trait| {
            let boxed_any: Box<dyn Any> = boxed_trait;
            boxed_any.downcast::<C>().ok().map(|boxed_c| *boxed_c)
        })
    }

    /// Get mutable access to a component
    pub fn get_component_mut<E: 'static, C: Component<Event = E> + 'static>(
        &mut self,
        key: Key<E>,
    ) -> Option<&mut C> {
        self.components
            .get_mut(&key.id)
            .and_then(|boxed_trait| boxed_trait.as_any_mut().downcast_mut::<C>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Simulation struct that puts different parts of the simulation together.
///
/// See the [crate-level documentation](index.html) for more information.
pub struct Simulation {
    scheduler: Scheduler,
    /// Component container.
    pub components: Components,
    steps: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        scheduler::reset_deferred();
        Self {
            scheduler: Scheduler::default(),
            components: Components::default(),
            steps: 0,
        }
    }
}

impl Simulation {
    /// Returns the current simulation time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.scheduler.time()
    }

    /// Number of events processed so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Performs one step of the simulation. Returns `true` if there was in fact an event
    /// available to process, and `false` otherwise, which signifies that the simulation
    /// ended.
    pub fn step(&mut self) -> bool {
        self.scheduler.process_deferred();

        let Some(event) = self.scheduler.pop() else {
            return false;
        };
        trace!(event_id = %event.id(), event_time = %event.time(), "Processing simulation step");

        self.components.process_event_entry(event, &mut self.scheduler);

        self.scheduler.process_deferred();
        self.steps += 1;
        true
    }

    /// Runs the entire simulation.
    ///
    /// The stopping condition and other execution details depend on the executor used.
    /// See [`Execute`] and [`Executor`] for more details.
    #[instrument(skip(self, executor), fields(initial_time = %self.time()))]
    pub fn execute<E: Execute>(&mut self, executor: E) {
        info!("Starting simulation execution");
        executor.execute(self);
        info!(final_time = %self.time(), steps = self.steps, "Simulation execution completed");
    }

    /// Adds a new component.
    #[must_use]
    #[instrument(skip(self, component), fields(component_type = std::any::type_name::<C>()))]
    pub fn add_component<E: std::fmt::Debug + 'static, C: Component<Event = E> + 'static>(
        &mut self,
        component: C,
    ) -> Key<E> {
        let key = self.components.register(component);
        debug!(component_id = ?key.id(), "Added component to simulation");
        key
    }

    /// Remove a component: usually at the end of the simulation to peek at the state
    #[must_use]
    #[instrument(skip(self), fields(component_id = ?key.id()))]
    pub fn remove_component<E: std::fmt::Debug + 'static, C: Component<Event = E> + 'static>(
        &mut self,
        key: Key<E>,
    ) -> Option<C> {
        let result = self.components.remove(key);
        if result.is_some() {
            debug!("Removed component from simulation");
        } else {
            warn!("Attempted to remove non-existent component");
        }
        result
    }

    /// Get mutable access to a component
    pub fn get_component_mut<E: std::fmt::Debug + 'static, C: Component<Event = E> + 'static>(
        &mut self,
        key: Key<E>,
    ) -> Option<&mut C> {
        self.components.get_component_mut(key)
    }

    /// Schedules a new event to be executed at `time` from now in component `component`.
    pub fn schedule<E: std::fmt::Debug + 'static>(
        &mut self,
        time: SimTime,
        component: Key<E>,
        event: E,
    ) {
        self.scheduler.schedule(time, component, event);
    }

    /// Returns the time of the next scheduled event, or None if no events are scheduled.
    pub fn peek_next_event_time(&mut self) -> Option<SimTime> {
        self.scheduler.process_deferred();
        self.scheduler.peek().map(EventEntry::time)
    }

    /// Returns a ClockRef for reading the simulation time.
    pub fn clock(&self) -> ClockRef {
        self.scheduler.clock()
    }
}
