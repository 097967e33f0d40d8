//! Synchronization metrics for the session monitor.

use serde::Serialize;
use std::collections::VecDeque;

/// Pollable summary of how well scenes kept up with narration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncMetrics {
    /// Mean scene latency over every committed sentence.
    pub average_latency_ms: f64,
    pub max_latency_ms: i64,
    /// Sentences whose scene was late or never arrived.
    pub drift_events: u64,
    /// Sentences measured.
    pub samples: u64,
    /// Mean latency over the recent window; flushed on skip.
    pub recent_average_ms: f64,
    /// Ticks that found no scene for the current sentence.
    pub degraded_ticks: u64,
    pub hit_rate: f64,
}

/// Accumulates latency samples.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    window: VecDeque<i64>,
    capacity: usize,
    total_ms: i128,
    max_ms: i64,
    samples: u64,
    drift_events: u64,
    degraded_ticks: u64,
    hits: u64,
    misses: u64,
}

impl MetricsRecorder {
    pub fn new(window: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window.max(1)),
            capacity: window.max(1),
            total_ms: 0,
            max_ms: 0,
            samples: 0,
            drift_events: 0,
            degraded_ticks: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Record the latency of one sentence's scene; zero means on time.
    pub fn record_sample(&mut self, latency_ms: i64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(latency_ms);
        self.total_ms += i128::from(latency_ms);
        self.max_ms = self.max_ms.max(latency_ms);
        self.samples += 1;
        if latency_ms > 0 {
            self.drift_events += 1;
        }
    }

    pub fn record_lookup(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
            self.degraded_ticks += 1;
        }
    }

    /// Drop the recent window. Totals are kept.
    pub fn flush_window(&mut self) {
        self.window.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn degraded_ticks(&self) -> u64 {
        self.degraded_ticks
    }

    pub fn snapshot(&self) -> SyncMetrics {
        let lookups = self.hits + self.misses;
        SyncMetrics {
            average_latency_ms: if self.samples == 0 {
                0.0
            } else {
                self.total_ms as f64 / self.samples as f64
            },
            max_latency_ms: self.max_ms,
            drift_events: self.drift_events,
            samples: self.samples,
            recent_average_ms: if self.window.is_empty() {
                0.0
            } else {
                self.window.iter().sum::<i64>() as f64 / self.window.len() as f64
            },
            degraded_ticks: self.degraded_ticks,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_averages_and_max() {
        let mut m = MetricsRecorder::new(8);
        m.record_sample(0);
        m.record_sample(300);
        m.record_sample(100);
        let s = m.snapshot();
        assert_eq!(s.samples, 3);
        assert_eq!(s.drift_events, 2);
        assert_eq!(s.max_latency_ms, 300);
        assert!((s.average_latency_ms - 133.333).abs() < 0.01);
    }

    #[test]
    fn test_window_is_bounded_and_flushable() {
        let mut m = MetricsRecorder::new(2);
        m.record_sample(1000);
        m.record_sample(10);
        m.record_sample(20);
        assert_eq!(m.snapshot().recent_average_ms, 15.0);

        m.flush_window();
        let s = m.snapshot();
        assert_eq!(s.recent_average_ms, 0.0);
        assert_eq!(s.max_latency_ms, 1000);
    }

    #[test]
    fn test_hit_rate() {
        let mut m = MetricsRecorder::new(4);
        m.record_lookup(true);
        m.record_lookup(false);
        m.record_lookup(true);
        m.record_lookup(true);
        let s = m.snapshot();
        assert_eq!(s.hit_rate, 0.75);
        assert_eq!(s.degraded_ticks, 1);
    }
}
