//! DES-based async runtime.
//!
//! This module provides an async runtime that uses simulation time instead of real time,
//! enabling async/await syntax while maintaining discrete event simulation semantics.
//!
//! # Key Components
//!
//! - [`DesRuntime`]: the component that owns and polls async tasks
//! - [`RuntimeHandle`]: cloneable handle used to spawn tasks, including from inside
//!   other tasks
//! - [`sim_sleep`]: sleep for a duration in simulation time
//!
//! # Basic Usage
//!
//! ```
//! use des_core::{Simulation, Execute, Executor, SimTime};
//! use des_core::async_runtime::{DesRuntime, sim_sleep};
//! use std::time::Duration;
//!
//! let mut sim = Simulation::default();
//! let runtime = DesRuntime::install(&mut sim);
//!
//! runtime.spawn(async {
//!     sim_sleep(Duration::from_millis(100)).await;
//!     sim_sleep(Duration::from_millis(50)).await;
//! });
//!
//! Executor::timed(SimTime::from_millis(200)).execute(&mut sim);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tracing::{debug, instrument, trace};

use crate::scheduler::{defer_schedule, defer_wake, Scheduler};
use crate::waker::create_des_waker;
use crate::{Component, Key, SimTime, Simulation};

/// Unique identifier for async tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

// Poll context, set while a task is being polled.
thread_local! {
    static CURRENT_TIME: Cell<Option<SimTime>> = const { Cell::new(None) };
    static CURRENT_RUNTIME_KEY: Cell<Option<Key<RuntimeEvent>>> = const { Cell::new(None) };
    static CURRENT_TASK_ID: Cell<Option<TaskId>> = const { Cell::new(None) };
}

/// Get the current simulation time (for use in futures).
pub fn current_sim_time() -> Option<SimTime> {
    CURRENT_TIME.with(Cell::get)
}


fn set_poll_context(time: SimTime, runtime_key: Key<RuntimeEvent>, task_id: TaskId) {
    CURRENT_TIME.with(|t| t.set(Some(time)));
    CURRENT_RUNTIME_KEY.with(|k| k.set(Some(runtime_key)));
    CURRENT_TASK_ID.with(|t| t.set(Some(task_id)));
}

fn clear_poll_context() {
    CURRENT_TIME.with(|t| t.set(None));
    CURRENT_RUNTIME_KEY.with(|k| k.set(None));
    CURRENT_TASK_ID.with(|t| t.set(None));
}

/// Schedule a wake-up of the current task after `delay` (used by SimSleep).
fn schedule_wake_after(delay: SimTime) -> bool {
    match (CURRENT_RUNTIME_KEY.with(Cell::get), CURRENT_TASK_ID.with(Cell::get)) {
        (Some(runtime_key), Some(task_id)) => {
            defer_schedule(delay, runtime_key, RuntimeEvent::Wake { task_id });
            true
        }
        _ => false,
    }
}

/// Events that drive the async runtime.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Adopt newly spawned tasks and poll everything that is ready.
    Poll,
    /// Wake a specific task (timer expiration or a signal).
    Wake { task_id: TaskId },
}

type BoxedTask = Pin<Box<dyn Future<Output = ()>>>;

/// Tasks spawned through a handle, waiting to be adopted by the runtime.
#[derive(Default)]
struct Spawner {
    next_task_id: u64,
    incoming: Vec<(TaskId, BoxedTask)>,
    spawned: u64,
    poll_requested: bool,
}

/// Cloneable handle for spawning tasks onto an installed [`DesRuntime`].
///
/// Spawning is deferred: new tasks are first polled by a separate runtime event at the
/// current simulation time, after the step that spawned them, in spawn order.
#[derive(Clone)]
pub struct RuntimeHandle {
    key: Key<RuntimeEvent>,
    spawner: Rc<RefCell<Spawner>>,
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("key", &self.key.id())
            .field("spawned", &self.spawner.borrow().spawned)
            .finish()
    }
}

impl RuntimeHandle {
    /// Spawn a new async task.
    pub fn spawn<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let (task_id, request_poll) = {
            let mut spawner = self.spawner.borrow_mut();
            let task_id = TaskId(spawner.next_task_id);
            spawner.next_task_id += 1;
            spawner.spawned += 1;
            spawner.incoming.push((task_id, Box::pin(future)));
            (task_id, !std::mem::replace(&mut spawner.poll_requested, true))
        };
        trace!(%task_id, "Spawned async task");
        if request_poll {
            defer_wake(self.key, RuntimeEvent::Poll);
        }
        task_id
    }

    /// Component key of the runtime.
    pub fn key(&self) -> Key<RuntimeEvent> {
        self.key
    }

    /// Total number of tasks spawned through this runtime.
    pub fn spawned(&self) -> u64 {
        self.spawner.borrow().spawned
    }
}

struct TaskSlot {
    future: BoxedTask,
    waker: Waker,
}

/// DES-based async runtime component.
///
/// The `DesRuntime` manages async tasks within a discrete event simulation.
/// Tasks only make progress when the runtime receives a [`RuntimeEvent`]; wake-ups from
/// timers and signals are delivered as events, so task interleaving follows the
/// scheduler's time and FIFO ordering.
pub struct DesRuntime {
    tasks: HashMap<TaskId, TaskSlot>,
    ready_queue: VecDeque<TaskId>,
    spawner: Rc<RefCell<Spawner>>,
    completed: u64,
}

impl DesRuntime {
    /// Add a runtime to the simulation and return a handle for spawning onto it.
    #[must_use]
    pub fn install(sim: &mut Simulation) -> RuntimeHandle {
        let spawner = Rc::new(RefCell::new(Spawner::default()));
        let runtime = DesRuntime {
            tasks: HashMap::new(),
            ready_queue: VecDeque::new(),
            spawner: Rc::clone(&spawner),
            completed: 0,
        };
        let key = sim.add_component(runtime);
        debug!(runtime_id = ?key.id(), "Installed async runtime");
        RuntimeHandle { key, spawner }
    }

    /// Get the number of live tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of tasks that ran to completion.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    fn adopt_spawned(&mut self, runtime_key: Key<RuntimeEvent>) {
        let incoming = {
            let mut spawner = self.spawner.borrow_mut();
            spawner.poll_requested = false;
            std::mem::take(&mut spawner.incoming)
        };
        for (task_id, future) in incoming {
            // One waker per task, so that signal primitives can recognise re-registrations
            let waker = create_des_waker(runtime_key, RuntimeEvent::Wake { task_id });
            self.tasks.insert(task_id, TaskSlot { future, waker });
            self.ready_queue.push_back(task_id);
        }
    }

    /// Poll a single task.
    fn poll_task(
        &mut self,
        runtime_key: Key<RuntimeEvent>,
        task_id: TaskId,
        now: SimTime,
    ) -> Option<Poll<()>> {
        let slot = self.tasks.get_mut(&task_id)?;
        let mut cx = Context::from_waker(&slot.waker);

        set_poll_context(now, runtime_key, task_id);
        let result = slot.future.as_mut().poll(&mut cx);
        clear_poll_context();

        match result {
            Poll::Ready(()) => trace!(%task_id, "Async task completed"),
            Poll::Pending => trace!(%task_id, "Async task returned Pending"),
        }
        Some(result)
    }

    /// Poll ready tasks until none are left.
    fn poll_ready_tasks(&mut self, runtime_key: Key<RuntimeEvent>, now: SimTime) {
        while let Some(task_id) = self.ready_queue.pop_front() {
            if let Some(Poll::Ready(())) = self.poll_task(runtime_key, task_id, now) {
                self.tasks.remove(&task_id);
                self.completed += 1;
            }
        }
    }

    /// Mark a task ready. Wake-ups for finished tasks are ignored.
    pub fn wake_task(&mut self, task_id: TaskId) {
        if self.tasks.contains_key(&task_id) && !self.ready_queue.contains(&task_id) {
            self.ready_queue.push_back(task_id);
        }
    }
}

impl Component for DesRuntime {
    type Event = RuntimeEvent;

    #[instrument(level = "trace", skip(self, scheduler), fields(
        event_type = ?event,
        current_time = %scheduler.time(),
        task_count = self.tasks.len()
    ))]
    fn process_event(
        &mut self,
        self_id: Key<Self::Event>,
        event: &Self::Event,
        scheduler: &mut Scheduler,
    ) {
        self.adopt_spawned(self_id);
        if let RuntimeEvent::Wake { task_id } = event {
            self.wake_task(*task_id);
        }
        self.poll_ready_tasks(self_id, scheduler.time());
    }
}

/// A future that completes after a simulated delay.
///
/// The deadline is fixed at the first poll. Use [`sim_sleep`] to create instances.
pub struct SimSleep {
    duration: Duration,
    deadline: Option<SimTime>,
    timer_scheduled: bool,
}

impl Future for SimSleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let Some(now) = current_sim_time() else {
            return Poll::Pending;
        };

        let duration = self.duration;
        let deadline = *self.deadline.get_or_insert_with(|| now + duration);
        if now >= deadline {
            return Poll::Ready(());
        }
        if !self.timer_scheduled {
            let delay = SimTime::from_duration(deadline - now);
            self.timer_scheduled = schedule_wake_after(delay);
        }
        Poll::Pending
    }
}

/// Sleep for a duration in simulation time.
///
/// # Example
///
/// ```
/// use des_core::async_runtime::sim_sleep;
/// use std::time::Duration;
///
/// async fn server_task() {
///     sim_sleep(Duration::from_millis(50)).await;
/// }
/// ```
pub fn sim_sleep(duration: Duration) -> SimSleep {
    SimSleep {
        duration,
        deadline: None,
        timer_scheduled: false,
    }
}
