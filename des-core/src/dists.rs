//! Distributions for arrivals, service times, network delay and key popularity
//!
//! Every sampler owns (or is handed) a seeded RNG, so a run is fully determined by its
//! seeds.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal, Uniform, Zeta};
use std::time::Duration;

use crate::SimError;

/// Trait for generating arrival patterns
pub trait ArrivalPattern: Send {
    /// Time until the next arrival.
    fn next_arrival_time(&mut self) -> Duration;
}

/// Trait for sampling service times from a distribution
pub trait ServiceTimeDistribution: Send {
    /// Sample the processing time of one request.
    fn sample(&mut self) -> Duration;

    /// Mean of the distribution. Replicas advertise this to clients.
    fn mean(&self) -> Duration;
}

// =============================================================================
// Arrival Pattern Implementations
// =============================================================================

/// Fixed inter-arrival time.
#[derive(Debug, Clone)]
pub struct ConstantArrivalPattern {
    inter_arrival_time: Duration,
}

impl ConstantArrivalPattern {
    pub fn new(inter_arrival_time: Duration) -> Self {
        Self { inter_arrival_time }
    }
}

impl ArrivalPattern for ConstantArrivalPattern {
    fn next_arrival_time(&mut self) -> Duration {
        self.inter_arrival_time
    }
}

/// Poisson process: exponentially distributed inter-arrival times.
pub struct PoissonArrivals {
    /// Arrivals per second
    rate: f64,
    rng: StdRng,
    exp_dist: Exp<f64>,
}

impl PoissonArrivals {
    /// `rate` is the average number of arrivals per second.
    pub fn new(rate: f64, seed: u64) -> Result<Self, SimError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(SimError::distribution("poisson arrivals", format!("rate must be positive, got {rate}")));
        }
        let exp_dist = Exp::new(rate).map_err(|e| SimError::distribution("poisson arrivals", e))?;
        Ok(Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            exp_dist,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl ArrivalPattern for PoissonArrivals {
    fn next_arrival_time(&mut self) -> Duration {
        Duration::from_secs_f64(self.exp_dist.sample(&mut self.rng))
    }
}

// =============================================================================
// Service Time Implementations
// =============================================================================

/// Always the same service time.
#[derive(Debug, Clone)]
pub struct ConstantServiceTime {
    duration: Duration,
}

impl ConstantServiceTime {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl ServiceTimeDistribution for ConstantServiceTime {
    fn sample(&mut self) -> Duration {
        self.duration
    }

    fn mean(&self) -> Duration {
        self.duration
    }
}

/// Exponentially distributed service times.
pub struct ExponentialDistribution {
    /// Services per second
    rate: f64,
    rng: StdRng,
    exp_dist: Exp<f64>,
}

impl ExponentialDistribution {
    /// Exponential service times with the given mean.
    pub fn with_mean(mean: Duration, seed: u64) -> Result<Self, SimError> {
        let secs = mean.as_secs_f64();
        if secs <= 0.0 {
            return Err(SimError::distribution("exponential service time", "mean must be positive"));
        }
        Self::new(1.0 / secs, seed)
    }

    /// `rate` is the average number of services per second.
    pub fn new(rate: f64, seed: u64) -> Result<Self, SimError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(SimError::distribution(
                "exponential service time",
                format!("rate must be positive, got {rate}"),
            ));
        }
        let exp_dist = Exp::new(rate).map_err(|e| SimError::distribution("exponential service time", e))?;
        Ok(Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            exp_dist,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl ServiceTimeDistribution for ExponentialDistribution {
    fn sample(&mut self) -> Duration {
        Duration::from_secs_f64(self.exp_dist.sample(&mut self.rng))
    }

    fn mean(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate)
    }
}

/// Service times drawn uniformly from `[min, max]`.
pub struct UniformDistribution {
    min_duration: Duration,
    max_duration: Duration,
    rng: StdRng,
    uniform_dist: Uniform<f64>,
}

impl UniformDistribution {
    pub fn new(min_duration: Duration, max_duration: Duration, seed: u64) -> Result<Self, SimError> {
        if min_duration > max_duration {
            return Err(SimError::distribution(
                "uniform service time",
                format!("min {min_duration:?} exceeds max {max_duration:?}"),
            ));
        }
        Ok(Self {
            min_duration,
            max_duration,
            rng: StdRng::seed_from_u64(seed),
            uniform_dist: Uniform::new_inclusive(min_duration.as_secs_f64(), max_duration.as_secs_f64()),
        })
    }
}

impl ServiceTimeDistribution for UniformDistribution {
    fn sample(&mut self) -> Duration {
        Duration::from_secs_f64(self.uniform_dist.sample(&mut self.rng))
    }

    fn mean(&self) -> Duration {
        (self.min_duration + self.max_duration) / 2
    }
}

// =============================================================================
// Network delay and key popularity
// =============================================================================

/// One-way network delay: `base + N(mean, std_dev)`, never negative.
///
/// The sampler does not own an RNG; callers pass the RNG of the entity sending the
/// message so that all of its randomness comes from one seeded stream.
#[derive(Debug, Clone, Copy)]
pub struct NetworkLatency {
    base: Duration,
    jitter: Option<Normal<f64>>,
}

impl NetworkLatency {
    /// Zero mean and zero deviation give a constant delay that draws nothing from the RNG.
    pub fn new(base: Duration, jitter_mean: Duration, jitter_std_dev: Duration) -> Result<Self, SimError> {
        if jitter_mean.is_zero() && jitter_std_dev.is_zero() {
            return Ok(Self::constant(base));
        }
        let jitter = Normal::new(jitter_mean.as_secs_f64(), jitter_std_dev.as_secs_f64())
            .map_err(|e| SimError::distribution("network latency", e))?;
        Ok(Self {
            base,
            jitter: Some(jitter),
        })
    }

    /// Delay without jitter.
    pub fn constant(base: Duration) -> Self {
        Self { base, jitter: None }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let Some(jitter) = self.jitter else {
            return self.base;
        };
        let secs = self.base.as_secs_f64() + jitter.sample(rng);
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Zipfian choice of an index in `0..n`: a zeta(2) draw reduced modulo `n`.
///
/// Small draws dominate (a draw of 1 has probability ~0.61), so index 1 is the hottest
/// and the tail is spread thinly over the remaining indices.
#[derive(Debug, Clone, Copy)]
pub struct ZipfIndex {
    zeta: Zeta<f64>,
}

impl ZipfIndex {
    pub fn new(exponent: f64) -> Result<Self, SimError> {
        let zeta = Zeta::new(exponent).map_err(|e| SimError::distribution("zipf", e))?;
        Ok(Self { zeta })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let draw = self.zeta.sample(rng) as u64;
        (draw % n as u64) as usize
    }
}
