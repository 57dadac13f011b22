//! Sliding window of replica feedback and the expected-delay estimate built on it

use crate::request::FeedbackEntry;
use std::collections::VecDeque;
use std::time::Duration;

/// The most recent `capacity` feedback entries for one replica, oldest first.
#[derive(Debug, Clone)]
pub struct FeedbackWindow {
    capacity: usize,
    entries: VecDeque<FeedbackEntry>,
}

impl FeedbackWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an entry, returning the one evicted to stay within capacity.
    pub fn push(&mut self, entry: FeedbackEntry) -> Option<FeedbackEntry> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeedbackEntry> {
        self.entries.iter()
    }

    /// Mean reported service time, or `None` for an empty window.
    pub fn mean_service_time(&self) -> Option<Duration> {
        if self.entries.is_empty() {
            return None;
        }
        let total: Duration = self.entries.iter().map(|e| e.service_time).sum();
        Some(total / self.entries.len() as u32)
    }
}

/// Expected delay of sending one more request to a replica, in seconds.
///
/// For each windowed entry the two-way network time is the observed response time
/// minus service and wait; the entry contributes that plus
/// `(1 + pending [+ queue_size_after]) * service_time`. The estimate is the mean over the
/// window, and 0 for an empty window so unexplored replicas rank first.
pub fn expected_delay(window: &FeedbackWindow, pending: usize, include_queue_size: bool) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let total: f64 = window
        .iter()
        .map(|entry| {
            let mut multiplier = 1.0 + pending as f64;
            if include_queue_size {
                multiplier += entry.queue_size_after as f64;
            }
            entry.two_way_network() + multiplier * entry.service_time.as_secs_f64()
        })
        .sum();
    total / window.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Feedback;

    fn entry(service_ms: u64, wait_ms: u64, queue: usize, response_ms: u64) -> FeedbackEntry {
        FeedbackEntry::new(
            Feedback {
                service_time: Duration::from_millis(service_ms),
                wait_time: Duration::from_millis(wait_ms),
                queue_size_after: queue,
            },
            Duration::from_millis(response_ms),
        )
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = FeedbackWindow::new(2);
        assert!(window.push(entry(1, 0, 0, 2)).is_none());
        assert!(window.push(entry(2, 0, 0, 3)).is_none());
        let evicted = window.push(entry(3, 0, 0, 4)).unwrap();
        assert_eq!(evicted.service_time, Duration::from_millis(1));
        assert_eq!(window.len(), 2);
        assert_eq!(window.mean_service_time(), Some(Duration::from_micros(2_500)));
    }

    #[test]
    fn test_empty_window_has_zero_delay() {
        let window = FeedbackWindow::new(10);
        assert_eq!(expected_delay(&window, 5, true), 0.0);
        assert_eq!(window.mean_service_time(), None);
    }

    #[test]
    fn test_expected_delay_formula() {
        let mut window = FeedbackWindow::new(10);
        // network 1ms, service 4ms
        window.push(entry(4, 1, 2, 6));
        // network 2ms, service 2ms
        window.push(entry(2, 0, 0, 4));

        // pending 1: ((1 + 2*4) + (2 + 2*2)) / 2 = 7.5ms
        let delay = expected_delay(&window, 1, false);
        assert!((delay - 0.0075).abs() < 1e-9, "{delay}");

        // queue size adds 2 to the first entry's multiplier: +8ms / 2
        let delay = expected_delay(&window, 1, true);
        assert!((delay - 0.0115).abs() < 1e-9, "{delay}");
    }

    #[test]
    fn test_negative_network_time_is_kept() {
        let mut window = FeedbackWindow::new(1);
        window.push(entry(4, 1, 0, 3));
        // -2ms network + 4ms service
        assert!((expected_delay(&window, 0, false) - 0.002).abs() < 1e-9);
    }
}
