//! Bridge counters and round-trip latency tracking
//!
//! Counters are updated from driver threads, the dispatcher and the host
//! domain, so everything here is atomic or behind a lock.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Most recent callbacks kept for latency statistics
const LATENCY_CAPACITY: usize = 256;

/// Callbacks that finished longer ago than this no longer count
const LATENCY_MAX_AGE: Duration = Duration::from_secs(10);

/// Round-trip latencies (queued to finished) of recent callbacks
#[derive(Debug)]
struct LatencyWindow {
    /// (finished at, latency in microseconds), oldest first
    recent: VecDeque<(Instant, u64)>,
}

impl LatencyWindow {
    fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(LATENCY_CAPACITY),
        }
    }

    fn record(&mut self, latency: Duration) {
        let now = Instant::now();
        if self.recent.len() == LATENCY_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back((now, latency.as_micros() as u64));

        if let Some(cutoff) = now.checked_sub(LATENCY_MAX_AGE) {
            let stale = self.recent.partition_point(|(at, _)| *at < cutoff);
            self.recent.drain(..stale);
        }
    }

    fn stats(&self) -> LatencyStats {
        let mut sorted: Vec<u64> = self.recent.iter().map(|(_, us)| *us).collect();
        if sorted.is_empty() {
            return LatencyStats::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        LatencyStats {
            min_us: sorted[0],
            max_us: sorted[count - 1],
            avg_us: sorted.iter().sum::<u64>() / count as u64,
            p95_us: sorted[(count * 95).div_ceil(100) - 1],
            sample_count: count,
        }
    }
}

/// Callback round-trip latency over the recent window, in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: u64,
    pub p95_us: u64,
    /// Callbacks in the window
    pub sample_count: usize,
}

impl LatencyStats {
    pub fn format_avg(&self) -> String {
        format_ms(self.avg_us)
    }

    pub fn format_p95(&self) -> String {
        format_ms(self.p95_us)
    }

    pub fn format_max(&self) -> String {
        format_ms(self.max_us)
    }
}

fn format_ms(us: u64) -> String {
    format!("{:.2} ms", us as f64 / 1000.0)
}

/// Point-in-time copy of the bridge counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Submission attempts, including rejected ones
    pub submitted: u64,
    /// Units executed without a fault
    pub completed: u64,
    /// Units whose host function panicked
    pub faulted: u64,
    /// Submissions refused because the bridge was shut down
    pub rejected: u64,
    /// Units dropped by the host domain without running
    pub abandoned: u64,
    /// Driver waits that hit the handoff timeout
    pub timed_out: u64,
    /// Events for channels missing from the registry
    pub routing_errors: u64,
    /// Queue-to-finish latency
    pub latency: LatencyStats,
}

/// Shared counters for one bridge instance
#[derive(Debug)]
pub struct BridgeMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    faulted: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
    timed_out: AtomicU64,
    routing_errors: AtomicU64,
    latency: RwLock<LatencyWindow>,
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            faulted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            routing_errors: AtomicU64::new(0),
            latency: RwLock::new(LatencyWindow::new()),
        }
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an executed unit with the time since it was queued
    pub(crate) fn record_executed(&self, latency: Duration, success: bool) {
        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.faulted.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut stats) = self.latency.write() {
            stats.record(latency);
        }
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_routing_error(&self) {
        self.routing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self
            .latency
            .read()
            .map(|stats| stats.stats())
            .unwrap_or_default();
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            routing_errors: self.routing_errors.load(Ordering::Relaxed),
            latency,
        }
    }
}
