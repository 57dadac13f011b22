//! Run loops for a [`Simulation`].
//!
//! An [`Executor`] steps the simulation until its horizon. Tests attach a
//! [`side_effect`](Executor::side_effect) to check model state between steps.

use crate::{SimTime, Simulation};

pub trait Execute {
    fn execute(self, sim: &mut Simulation);
}

/// Runs until the event queue drains, or until the next event lies past a time horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executor {
    horizon: Option<SimTime>,
}

impl Executor {
    /// Run until no events are left. Models with periodic tasks never finish this way.
    #[must_use]
    pub fn unbound() -> Self {
        Self { horizon: None }
    }

    /// Run every event scheduled at or before `horizon`.
    ///
    /// The clock stops at the last processed event, not at `horizon`.
    #[must_use]
    pub fn timed(horizon: SimTime) -> Self {
        Self {
            horizon: Some(horizon),
        }
    }

    /// Call `observer` after every processed event.
    #[must_use]
    pub fn side_effect<F>(self, observer: F) -> Observed<F>
    where
        F: Fn(&Simulation),
    {
        Observed {
            executor: self,
            observer,
        }
    }

    fn run(self, sim: &mut Simulation, observer: impl Fn(&Simulation)) {
        loop {
            match (sim.peek_next_event_time(), self.horizon) {
                (None, _) => break,
                (Some(next), Some(horizon)) if next > horizon => break,
                _ => {}
            }
            if sim.step() {
                observer(sim);
            }
        }
    }
}

impl Execute for Executor {
    fn execute(self, sim: &mut Simulation) {
        self.run(sim, |_| {});
    }
}

/// An [`Executor`] with an observer, built by [`Executor::side_effect`].
pub struct Observed<F> {
    executor: Executor,
    observer: F,
}

impl<F> Execute for Observed<F>
where
    F: Fn(&Simulation),
{
    fn execute(self, sim: &mut Simulation) {
        self.executor.run(sim, self.observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Component, Key, Scheduler};
    use std::cell::Cell;

    /// Ticks every two seconds, ten times.
    struct Ticker {
        ticks: usize,
    }

    #[derive(Debug)]
    struct Tick;

    impl Component for Ticker {
        type Event = Tick;

        fn process_event(&mut self, self_id: Key<Tick>, _event: &Tick, scheduler: &mut Scheduler) {
            self.ticks += 1;
            if self.ticks < 10 {
                scheduler.schedule(SimTime::from_secs(2), self_id, Tick);
            }
        }
    }

    fn ticking() -> (Simulation, Key<Tick>) {
        let mut sim = Simulation::default();
        let key = sim.add_component(Ticker { ticks: 0 });
        sim.schedule(SimTime::zero(), key, Tick);
        (sim, key)
    }

    #[test]
    fn test_unbound_drains_queue() {
        let (mut sim, key) = ticking();
        Executor::unbound().execute(&mut sim);
        let ticker: Ticker = sim.remove_component(key).unwrap();
        assert_eq!(ticker.ticks, 10);
        assert_eq!(sim.time(), SimTime::from_secs(18));
    }

    #[test]
    fn test_timed_horizon_is_inclusive() {
        let (mut sim, key) = ticking();
        Executor::timed(SimTime::from_secs(6)).execute(&mut sim);
        let ticker: Ticker = sim.remove_component(key).unwrap();
        assert_eq!(ticker.ticks, 4);
        assert_eq!(sim.time(), SimTime::from_secs(6));
    }

    #[test]
    fn test_timed_clock_stops_at_last_event() {
        let (mut sim, key) = ticking();
        Executor::timed(SimTime::from_secs(5)).execute(&mut sim);
        assert_eq!(sim.time(), SimTime::from_secs(4));

        // A later horizon resumes where the previous run stopped
        Executor::timed(SimTime::from_secs(9)).execute(&mut sim);
        let ticker: Ticker = sim.remove_component(key).unwrap();
        assert_eq!(ticker.ticks, 5);
        assert_eq!(sim.time(), SimTime::from_secs(8));
    }

    #[test]
    fn test_side_effect_sees_every_step() {
        let (mut sim, _) = ticking();
        let observed = Cell::new(Vec::new());
        Executor::timed(SimTime::from_secs(7))
            .side_effect(|sim| {
                let mut times = observed.take();
                times.push(sim.time());
                observed.set(times);
            })
            .execute(&mut sim);
        assert_eq!(
            observed.take(),
            (0..4).map(|i| SimTime::from_secs(2 * i)).collect::<Vec<_>>()
        );
    }
}
