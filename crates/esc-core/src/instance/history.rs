//! Bounded history of completed-analysis latencies

use std::collections::VecDeque;

/// Latencies of the most recent completed analyses, oldest first
///
/// Holds at most `capacity` entries. A retained id is not recorded twice;
/// duplicates of evicted ids are filtered out by the caller.
#[derive(Debug, Clone)]
pub struct LatencyHistory {
    capacity: usize,
    entries: VecDeque<(u64, f64)>,
}

impl LatencyHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record the latency of `analysis_id`; returns false for duplicates
    pub fn record(&mut self, analysis_id: u64, latency_secs: f64) -> bool {
        if self.contains(analysis_id) {
            return false;
        }

        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((analysis_id, latency_secs));
        true
    }

    pub fn contains(&self, analysis_id: u64) -> bool {
        self.entries.iter().any(|(id, _)| *id == analysis_id)
    }

    /// Mean of the retained latencies
    pub fn average(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let sum: f64 = self.entries.iter().map(|(_, latency)| latency).sum();
        Some(sum / self.entries.len() as f64)
    }

    /// Retained latencies, oldest first
    pub fn latencies(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, latency)| *latency).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
