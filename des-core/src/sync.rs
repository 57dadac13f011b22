//! Coordination primitives for tasks running on the DES runtime.
//!
//! - [`Signal`]: broadcast notification. A waiter completes on the first `fire()` that
//!   happens after the waiter was created; earlier fires are not remembered.
//! - [`OneShot`]: latched single-value completion, cloneable on both ends.
//!
//! Both wake their waiters through the task's DES waker, so resumption happens in a
//! later event at the current simulation time, in the order the waiters registered.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Single-threaded simulation: a poisoned lock only means a task panicked while
    // holding it, and the state is still consistent for our purposes.
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn register(waiters: &mut Vec<Waker>, waker: &Waker) {
    if !waiters.iter().any(|w| w.will_wake(waker)) {
        waiters.push(waker.clone());
    }
}

#[derive(Debug, Default)]
struct SignalState {
    generation: u64,
    waiters: Vec<Waker>,
}

/// Generation-counted broadcast signal.
#[derive(Clone, Debug, Default)]
pub struct Signal {
    inner: Arc<Mutex<SignalState>>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every current waiter. Returns how many were woken.
    pub fn fire(&self) -> usize {
        let wakers = {
            let mut state = lock(&self.inner);
            state.generation = state.generation.wrapping_add(1);
            std::mem::take(&mut state.waiters)
        };
        let woken = wakers.len();
        for w in wakers {
            w.wake();
        }
        woken
    }

    /// Future that resolves on the next `fire()`.
    pub fn wait(&self) -> SignalWait {
        SignalWait {
            inner: Arc::clone(&self.inner),
            generation: lock(&self.inner).generation,
        }
    }

    /// Number of times the signal has fired.
    pub fn generation(&self) -> u64 {
        lock(&self.inner).generation
    }

    /// Number of registered waiters.
    pub fn waiter_count(&self) -> usize {
        lock(&self.inner).waiters.len()
    }
}

pub struct SignalWait {
    inner: Arc<Mutex<SignalState>>,
    generation: u64,
}

impl Future for SignalWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = lock(&self.inner);
        if state.generation != self.generation {
            return Poll::Ready(());
        }
        register(&mut state.waiters, cx.waker());
        Poll::Pending
    }
}

#[derive(Debug)]
struct OneShotState<T> {
    value: Option<T>,
    waiters: Vec<Waker>,
}

/// Latched completion carrying a value.
///
/// The first `fire` stores the value and wakes all waiters; later fires are rejected.
/// Waiting after the latch was set completes immediately with a clone of the value.
#[derive(Debug)]
pub struct OneShot<T> {
    inner: Arc<Mutex<OneShotState<T>>>,
}

impl<T> Clone for OneShot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for OneShot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OneShotState {
                value: None,
                waiters: Vec::new(),
            })),
        }
    }
}

impl<T: Clone> OneShot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value. Returns `Err(value)` if the latch was already set.
    pub fn fire(&self, value: T) -> Result<(), T> {
        let wakers = {
            let mut state = lock(&self.inner);
            if state.value.is_some() {
                return Err(value);
            }
            state.value = Some(value);
            std::mem::take(&mut state.waiters)
        };
        for w in wakers {
            w.wake();
        }
        Ok(())
    }

    pub fn is_fired(&self) -> bool {
        lock(&self.inner).value.is_some()
    }

    /// Current value, if fired.
    pub fn peek(&self) -> Option<T> {
        lock(&self.inner).value.clone()
    }

    pub fn wait(&self) -> OneShotWait<T> {
        OneShotWait {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct OneShotWait<T> {
    inner: Arc<Mutex<OneShotState<T>>>,
}

impl<T: Clone> Future for OneShotWait<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = lock(&self.inner);
        if let Some(value) = &state.value {
            return Poll::Ready(value.clone());
        }
        register(&mut state.waiters, cx.waker());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_runtime::{current_sim_time, sim_sleep, DesRuntime};
    use crate::{Execute, Executor, SimTime, Simulation};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn test_signal_wakes_all_waiters_in_registration_order() {
        let mut sim = Simulation::default();
        let runtime = DesRuntime::install(&mut sim);
        let signal = Signal::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let signal = signal.clone();
            let log = log.clone();
            runtime.spawn(async move {
                signal.wait().await;
                log.borrow_mut().push((name, current_sim_time().unwrap()));
            });
        }
        let firer = signal.clone();
        runtime.spawn(async move {
            sim_sleep(Duration::from_millis(5)).await;
            assert_eq!(firer.fire(), 3);
        });

        Executor::unbound().execute(&mut sim);
        let t = SimTime::from_millis(5);
        assert_eq!(*log.borrow(), vec![("a", t), ("b", t), ("c", t)]);
        assert_eq!(signal.generation(), 1);
    }

    #[test]
    fn test_signal_does_not_remember_past_fires() {
        let mut sim = Simulation::default();
        let runtime = DesRuntime::install(&mut sim);
        let signal = Signal::new();
        signal.fire();

        let done = Rc::new(RefCell::new(false));
        let flag = done.clone();
        let waiter = signal.clone();
        runtime.spawn(async move {
            waiter.wait().await;
            *flag.borrow_mut() = true;
        });

        Executor::unbound().execute(&mut sim);
        assert!(!*done.borrow());
        assert_eq!(signal.waiter_count(), 1);
    }

    #[test]
    fn test_oneshot_latches_value() {
        let mut sim = Simulation::default();
        let runtime = DesRuntime::install(&mut sim);
        let latch: OneShot<u32> = OneShot::new();
        let got = Rc::new(RefCell::new(Vec::new()));

        let early = latch.clone();
        let early_got = got.clone();
        runtime.spawn(async move {
            let v = early.wait().await;
            early_got.borrow_mut().push((v, current_sim_time().unwrap()));
        });
        let producer = latch.clone();
        runtime.spawn(async move {
            sim_sleep(Duration::from_millis(3)).await;
            assert!(producer.fire(11).is_ok());
            assert_eq!(producer.fire(12), Err(12));
        });
        let late = latch.clone();
        let late_got = got.clone();
        runtime.spawn(async move {
            sim_sleep(Duration::from_millis(9)).await;
            let v = late.wait().await;
            late_got.borrow_mut().push((v, current_sim_time().unwrap()));
        });

        Executor::unbound().execute(&mut sim);
        assert_eq!(
            *got.borrow(),
            vec![(11, SimTime::from_millis(3)), (11, SimTime::from_millis(9))]
        );
        assert_eq!(latch.peek(), Some(11));
    }
}
