//! Wakers that turn `Waker::wake` into a simulation event.
//!
//! Waking never touches the scheduler directly: the event goes through
//! [`defer_wake`](crate::defer_wake) and is queued once the current step finishes.

use std::fmt::Debug;
use std::sync::Arc;
use std::task::{RawWaker, RawWakerVTable, Waker};

use crate::scheduler::defer_wake;
use crate::Key;

/// Arc-wrapped waker data for efficient cloning.
struct WakerDataArc {
    schedule_fn: Box<dyn Fn() + Send + Sync>,
}

impl WakerDataArc {
    fn new<E: Debug + Clone + Send + Sync + 'static>(key: Key<E>, event: E) -> Arc<Self> {
        Arc::new(Self {
            schedule_fn: Box::new(move || {
                defer_wake(key, event.clone());
            }),
        })
    }

    fn wake(&self) {
        (self.schedule_fn)();
    }
}

/// VTable for Arc-based DES waker.
static DES_WAKER_VTABLE: RawWakerVTable = RawWakerVTable::new(
    des_waker_clone,
    des_waker_wake,
    des_waker_wake_by_ref,
    des_waker_drop,
);

unsafe fn des_waker_clone(data: *const ()) -> RawWaker {
    Arc::increment_strong_count(data as *const WakerDataArc);
    RawWaker::new(data, &DES_WAKER_VTABLE)
}

unsafe fn des_waker_wake(data: *const ()) {
    let arc = Arc::from_raw(data as *const WakerDataArc);
    arc.wake();
    // Arc is dropped here, decrementing ref count
}

unsafe fn des_waker_wake_by_ref(data: *const ()) {
    let waker_data = &*(data as *const WakerDataArc);
    waker_data.wake();
}

unsafe fn des_waker_drop(data: *const ()) {
    drop(Arc::from_raw(data as *const WakerDataArc));
}

/// Create a DES-aware waker that schedules an event when woken.
///
/// Every `wake()`/`wake_by_ref()` queues one copy of `event` for `key` at the current
/// simulation time. Wakers must be used on the thread that runs the simulation.
pub fn create_des_waker<E: Debug + Clone + Send + Sync + 'static>(key: Key<E>, event: E) -> Waker {
    let arc = WakerDataArc::new(key, event);
    let raw_waker = RawWaker::new(Arc::into_raw(arc) as *const (), &DES_WAKER_VTABLE);
    unsafe { Waker::from_raw(raw_waker) }
}
