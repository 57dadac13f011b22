use std::any::Any;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::rc::Rc;
use tracing::trace;
use uuid::Uuid;

use crate::types::EventId;
use crate::{Key, SimTime};

/// Entry stored in the scheduler: the event value, the component key, and the time when
/// it is supposed to occur.
///
/// Entries are ordered by time and, for equal times, by the order in which they were
/// scheduled, so that simultaneous events are processed first-in first-out.
#[derive(Debug)]
pub struct EventEntry {
    event_id: EventId,
    time: SimTime,
    pub(crate) component: Uuid,
    inner: Box<dyn Any>,
}

impl EventEntry {
    pub(crate) fn new<E: fmt::Debug + 'static>(
        id: EventId,
        time: SimTime,
        component: Key<E>,
        event: E,
    ) -> Self {
        EventEntry {
            event_id: id,
            time,
            component: component.id,
            inner: Box::new(event),
        }
    }

    /// Time at which this event fires.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Scheduling sequence number.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.event_id
    }

    /// Tries to downcast the event entry to one holding an event of type `E`.
    /// If fails, returns `None`.
    #[must_use]
    pub fn downcast<E: fmt::Debug + 'static>(&self) -> Option<EventEntryTyped<'_, E>> {
        self.inner.downcast_ref::<E>().map(|event| EventEntryTyped {
            id: self.event_id,
            time: self.time,
            component_key: Key::new_with_id(self.component),
            component_idx: self.component,
            event,
        })
    }
}

impl PartialEq for EventEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.event_id == other.event_id
    }
}

impl Eq for EventEntry {}

impl PartialOrd for EventEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.event_id.cmp(&self.event_id))
    }
}

#[derive(Debug)]
pub struct EventEntryTyped<'e, E: fmt::Debug> {
    pub id: EventId,
    pub time: SimTime,
    pub component_key: Key<E>,
    pub component_idx: Uuid,
    pub event: &'e E,
}

type Clock = Rc<Cell<SimTime>>;

/// This struct exposes only immutable access to the simulation clock.
/// The clock itself is owned by the scheduler, while others can obtain `ClockRef`
/// to read the current simulation time.
///
/// # Example
///
/// ```
/// # use des_core::Scheduler;
/// let scheduler = Scheduler::default();
/// let clock_ref = scheduler.clock();
/// assert_eq!(clock_ref.time(), scheduler.time());
/// ```
#[derive(Clone)]
pub struct ClockRef {
    clock: Clock,
}

impl From<Clock> for ClockRef {
    fn from(clock: Clock) -> Self {
        Self { clock }
    }
}

impl fmt::Debug for ClockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockRef").field("time", &self.time()).finish()
    }
}

impl ClockRef {
    /// Return the current simulation time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.clock.get()
    }
}

type DeferredOp = Box<dyn FnOnce(&mut Scheduler)>;

// Work registered by wakers and async tasks while the scheduler is busy. The simulation
// drains this queue before and after every step, so deferred events keep their
// registration order.
thread_local! {
    static DEFERRED: RefCell<VecDeque<DeferredOp>> = RefCell::new(VecDeque::new());
}

/// Schedule `event` for `key` at the current simulation time, from code that has no
/// access to the scheduler (wakers, async tasks, signal primitives).
pub fn defer_wake<E: fmt::Debug + 'static>(key: Key<E>, event: E) {
    defer_schedule(SimTime::zero(), key, event);
}

/// Schedule `event` for `key` after `delay`, from code that has no access to the
/// scheduler. The delay is measured from the time the deferred queue is drained, which
/// is always the time of the step that registered it.
pub fn defer_schedule<E: fmt::Debug + 'static>(delay: SimTime, key: Key<E>, event: E) {
    DEFERRED.with(|q| {
        q.borrow_mut()
            .push_back(Box::new(move |scheduler: &mut Scheduler| {
                scheduler.schedule(delay, key, event);
            }));
    });
}

/// Drop anything left in the deferred queue by a previous simulation on this thread.
pub(crate) fn reset_deferred() {
    DEFERRED.with(|q| q.borrow_mut().clear());
}

/// Scheduler is used to keep the current time and information about the upcoming events.
///
/// See the [crate-level documentation](index.html) for more information.
pub struct Scheduler {
    next_event_id: u64,
    events: BinaryHeap<EventEntry>,
    clock: Clock,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            next_event_id: 0,
            events: BinaryHeap::default(),
            clock: Rc::new(Cell::new(SimTime::default())),
        }
    }
}

impl Scheduler {
    /// Schedules `event` to be executed for `component` at `self.time() + time`.
    pub fn schedule<E: fmt::Debug + 'static>(&mut self, time: SimTime, component: Key<E>, event: E) {
        self.next_event_id += 1;
        let time = self.time() + time;
        trace!(event_id = self.next_event_id, ?time, ?event, "Event scheduled");
        self.events
            .push(EventEntry::new(EventId(self.next_event_id), time, component, event));
    }

    /// Returns the current simulation time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.clock.get()
    }

    /// Returns a structure with immutable access to the simulation time.
    #[must_use]
    pub fn clock(&self) -> ClockRef {
        ClockRef {
            clock: Rc::clone(&self.clock),
        }
    }

    /// Returns a reference to the next scheduled event or `None` if none are left.
    pub fn peek(&mut self) -> Option<&EventEntry> {
        self.events.peek()
    }

    /// Removes and returns the next scheduled event or `None` if none are left.
    pub fn pop(&mut self) -> Option<EventEntry> {
        self.events.pop().inspect(|event| {
            self.clock.replace(event.time());
        })
    }

    /// Number of events waiting in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Move all deferred work into the event queue. Returns how many entries were applied.
    pub fn process_deferred(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let op = DEFERRED.with(|q| q.borrow_mut().pop_front());
            match op {
                Some(op) => {
                    op(self);
                    applied += 1;
                }
                None => break,
            }
        }
        if applied > 0 {
            trace!(applied, "Processed deferred scheduling");
        }
        applied
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ids::{deterministic_uuid, UUID_DOMAIN_KEY};
    use std::time::Duration;

    fn key<E>(n: u64) -> Key<E> {
        Key::new_with_id(deterministic_uuid(0, UUID_DOMAIN_KEY, n))
    }

    #[test]
    fn test_clock_ref() {
        let time = SimTime::from_duration(Duration::from_secs(1));
        let clock = Clock::new(Cell::new(time));
        let clock_ref = ClockRef::from(clock);
        assert_eq!(clock_ref.time(), time);
    }

    #[test]
    fn test_event_entry_downcast() {
        let entry = EventEntry::new(EventId(0), SimTime::from_secs(1), key::<String>(1), String::from("inner"));
        assert!(entry.downcast::<String>().is_some());
        assert!(entry.downcast::<i32>().is_none());
    }

    #[test]
    fn test_event_entry_cmp() {
        let early = EventEntry::new(EventId(5), SimTime::from_secs(0), key::<u8>(1), 0u8);
        let late = EventEntry::new(EventId(1), SimTime::from_secs(1), key::<u8>(1), 0u8);
        // Min-heap: the earlier event compares greater
        assert_eq!(early.cmp(&late), Ordering::Greater);

        let first = EventEntry::new(EventId(1), SimTime::from_secs(1), key::<u8>(1), 0u8);
        let second = EventEntry::new(EventId(2), SimTime::from_secs(1), key::<u8>(1), 0u8);
        assert_eq!(first.cmp(&second), Ordering::Greater);
        assert_ne!(first, second);
    }

    #[derive(Debug, Clone, Eq, PartialEq)]
    struct EventA;
    #[derive(Debug, Clone, Eq, PartialEq)]
    struct EventB;

    #[test]
    fn test_scheduler() {
        let mut scheduler = Scheduler::default();
        assert_eq!(scheduler.time(), SimTime::zero());
        assert_eq!(scheduler.clock().time(), SimTime::zero());
        assert!(scheduler.is_empty());

        let component_a = key::<EventA>(1);
        let component_b = key::<EventB>(2);

        scheduler.schedule(SimTime::from_secs(1), component_a, EventA);
        scheduler.schedule(SimTime::zero(), component_b, EventB);
        scheduler.schedule(SimTime::from_secs(2), component_b, EventB);
        assert_eq!(scheduler.len(), 3);

        let entry = scheduler.pop().unwrap();
        let entry = entry.downcast::<EventB>().unwrap();
        assert_eq!(entry.time, SimTime::zero());
        assert_eq!(entry.component_idx, component_b.id);
        assert_eq!(entry.event, &EventB);

        let entry = scheduler.pop().unwrap();
        let entry = entry.downcast::<EventA>().unwrap();
        assert_eq!(entry.time, SimTime::from_secs(1));
        assert_eq!(entry.component_key.id, component_a.id);
        assert_eq!(scheduler.clock().time(), SimTime::from_secs(1));

        let entry = scheduler.pop().unwrap();
        assert!(entry.downcast::<EventB>().is_some());
        assert_eq!(scheduler.time(), SimTime::from_secs(2));

        assert!(scheduler.pop().is_none());
    }

    #[test]
    fn test_same_time_events_pop_in_schedule_order() {
        let mut scheduler = Scheduler::default();
        let component = key::<u32>(7);
        for i in 0..20u32 {
            scheduler.schedule(SimTime::from_millis(5), component, i);
        }
        let order: Vec<u32> = std::iter::from_fn(|| scheduler.pop())
            .map(|e| *e.downcast::<u32>().unwrap().event)
            .collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_deferred_wake_is_applied_in_order() {
        reset_deferred();
        let mut scheduler = Scheduler::default();
        let component = key::<&'static str>(3);

        defer_wake(component, "first");
        defer_schedule(SimTime::from_millis(1), component, "later");
        defer_wake(component, "second");
        assert!(scheduler.is_empty());

        assert_eq!(scheduler.process_deferred(), 3);
        let order: Vec<&str> = std::iter::from_fn(|| scheduler.pop())
            .map(|e| *e.downcast::<&'static str>().unwrap().event)
            .collect();
        assert_eq!(order, vec!["first", "second", "later"]);
        assert_eq!(scheduler.process_deferred(), 0);
    }
}
