//! Matcher statistics

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rolling window size for latency percentiles
pub const LATENCY_WINDOW: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatcherStats {
    pub processed: u64,
    pub matched: u64,
    pub unclassified: u64,
    pub deferred: u64,
    pub dropped_messages: u64,
    pub dropped_results: u64,
    pub worker_restarts: u64,
    pub queued: usize,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// Messages per second since start
    pub throughput: f64,
}

/// Fixed-size latency ring
#[derive(Debug)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, latency: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency.as_secs_f64() * 1000.0);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Nearest-rank percentile, `p` in [0, 100]
    pub fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }
}

/// Shared counters updated by workers
#[derive(Debug)]
pub(crate) struct StatsRecorder {
    started: Instant,
    latencies: Mutex<LatencyWindow>,
    pub processed: AtomicU64,
    pub matched: AtomicU64,
    pub unclassified: AtomicU64,
    pub deferred: AtomicU64,
    pub dropped_messages: AtomicU64,
    pub dropped_results: AtomicU64,
    pub worker_restarts: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            latencies: Mutex::new(LatencyWindow::new(LATENCY_WINDOW)),
            processed: AtomicU64::new(0),
            matched: AtomicU64::new(0),
            unclassified: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
            dropped_results: AtomicU64::new(0),
            worker_restarts: AtomicU64::new(0),
        }
    }

    pub fn record_latency(&self, latency: Duration) {
        self.latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .record(latency);
    }

    pub fn snapshot(&self, queued: usize) -> MatcherStats {
        let processed = self.processed.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();
        let window = self.latencies.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        MatcherStats {
            processed,
            matched: self.matched.load(Ordering::Relaxed),
            unclassified: self.unclassified.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            dropped_results: self.dropped_results.load(Ordering::Relaxed),
            worker_restarts: self.worker_restarts.load(Ordering::Relaxed),
            queued,
            avg_latency_ms: window.average(),
            p95_latency_ms: window.percentile(95.0),
            p99_latency_ms: window.percentile(99.0),
            throughput: if elapsed > 0.0 { processed as f64 / elapsed } else { 0.0 },
        }
    }
}
