//! Observation collection for simulation analysis
//!
//! A [`Monitor`] is a named, cloneable sink of `(time, series, value)` samples. Every
//! sample is kept for inspection after the run and also recorded through the
//! `metrics` facade as a histogram named after the monitor and labelled by series, so
//! an installed exporter sees the same data.

use crate::SimTime;
use metrics::{counter, histogram};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A single recorded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub time: SimTime,
    pub series: String,
    pub value: f64,
}

#[derive(Debug)]
struct MonitorInner {
    name: String,
    observations: Mutex<Vec<Observation>>,
}

/// Named observation sink shared between components.
#[derive(Debug, Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                name: name.into(),
                observations: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn samples(&self) -> MutexGuard<'_, Vec<Observation>> {
        self.inner
            .observations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record `value` for `series` at `time`.
    pub fn observe(&self, time: SimTime, series: impl Into<String>, value: f64) {
        let series = series.into();
        histogram!(self.inner.name.clone(), "series" => series.clone()).record(value);
        counter!(format!("{}_samples", self.inner.name)).increment(1);
        self.samples().push(Observation {
            time,
            series,
            value,
        });
    }

    /// Number of samples recorded so far.
    pub fn len(&self) -> usize {
        self.samples().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples().is_empty()
    }

    /// Copy of every sample, in recording order.
    pub fn observations(&self) -> Vec<Observation> {
        self.samples().clone()
    }

    /// Values recorded for one series, in recording order.
    pub fn values(&self, series: &str) -> Vec<f64> {
        self.samples()
            .iter()
            .filter(|o| o.series == series)
            .map(|o| o.value)
            .collect()
    }

    /// Most recent value of a series.
    pub fn last(&self, series: &str) -> Option<f64> {
        self.samples()
            .iter()
            .rev()
            .find(|o| o.series == series)
            .map(|o| o.value)
    }

    /// Per-series summary statistics.
    pub fn summary(&self) -> BTreeMap<String, SeriesSummary> {
        let mut out: BTreeMap<String, SeriesSummary> = BTreeMap::new();
        for o in self.samples().iter() {
            out.entry(o.series.clone())
                .and_modify(|s| s.add(o.value))
                .or_insert_with(|| SeriesSummary::first(o.value));
        }
        out
    }
}

/// Count, mean and extremes of one series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesSummary {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            mean: value,
            min: value,
            max: value,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}
