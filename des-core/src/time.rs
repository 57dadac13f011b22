//! Virtual time

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A point on the virtual clock, in nanoseconds since the simulation started.
///
/// Scheduling uses the same type for relative delays: `Scheduler::schedule` takes the
/// offset from now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    pub const fn zero() -> Self {
        SimTime(0)
    }

    pub const fn from_micros(micros: u64) -> Self {
        SimTime(micros * 1_000)
    }

    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis * 1_000_000)
    }

    pub const fn from_secs(secs: u64) -> Self {
        SimTime(secs * 1_000_000_000)
    }

    /// Saturates at the end of the clock for durations that do not fit.
    pub fn from_duration(duration: Duration) -> Self {
        SimTime(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }
}

impl Add<SimTime> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> Self::Output {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> Self::Output {
        self + SimTime::from_duration(rhs)
    }
}

/// Elapsed time between two instants, zero if `rhs` is later.
impl Sub<SimTime> for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Self::Output {
        Duration::from_nanos(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0;
        if nanos >= 1_000_000_000 {
            write!(f, "{}.{:03}s", nanos / 1_000_000_000, nanos / 1_000_000 % 1_000)
        } else if nanos >= 1_000_000 {
            write!(f, "{}.{:03}ms", nanos / 1_000_000, nanos / 1_000 % 1_000)
        } else if nanos >= 1_000 {
            write!(f, "{}.{:03}µs", nanos / 1_000, nanos % 1_000)
        } else {
            write!(f, "{nanos}ns")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(SimTime::zero().as_nanos(), 0);
        assert_eq!(SimTime::from_micros(1).as_nanos(), 1_000);
        assert_eq!(SimTime::from_millis(1).as_nanos(), 1_000_000);
        assert_eq!(SimTime::from_secs(1).as_nanos(), 1_000_000_000);
        assert_eq!(SimTime::from_duration(Duration::from_micros(250)), SimTime::from_micros(250));
        assert_eq!(SimTime::from_duration(Duration::MAX).as_nanos(), u64::MAX);
    }

    #[test]
    fn test_arithmetic_saturates() {
        let t1 = SimTime::from_millis(100);
        let t2 = SimTime::from_millis(50);

        assert_eq!(t1 + Duration::from_millis(25), SimTime::from_millis(125));
        assert_eq!(t1 + t2, SimTime::from_millis(150));
        assert_eq!(t1 - t2, Duration::from_millis(50));
        assert_eq!(t2 - t1, Duration::ZERO);
        assert_eq!(SimTime::from_duration(Duration::MAX) + t1, SimTime::from_duration(Duration::MAX));
    }

    #[test]
    fn test_display_picks_unit() {
        assert_eq!(SimTime::from_millis(1500).to_string(), "1.500s");
        assert_eq!(SimTime::from_micros(2_500).to_string(), "2.500ms");
        assert_eq!(SimTime::from_micros(7).to_string(), "7.000µs");
        assert_eq!((SimTime::zero() + Duration::from_nanos(12)).to_string(), "12ns");
    }
}
