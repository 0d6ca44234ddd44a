//! Region Metrics
//!
//! Counters and latency averages for the tiered read/write paths of one
//! region. L1 hit/miss counts live in the L1 itself; these cover what
//! happens after an L1 miss.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// EMA smoothing factor
const LATENCY_ALPHA: f64 = 0.1;

/// Per-region metrics collector
#[derive(Debug, Default)]
pub struct RegionMetrics {
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l2_errors: AtomicU64,
    backfills: AtomicU64,
    decode_failures: AtomicU64,

    loads: AtomicU64,
    load_failures: AtomicU64,
    load_timeouts: AtomicU64,
    coalesced_waits: AtomicU64,

    writes: AtomicU64,
    evictions: AtomicU64,

    // Latencies in microseconds (exponential moving average)
    l2_read_latency_us: AtomicU64,
    l2_write_latency_us: AtomicU64,
    load_latency_us: AtomicU64,
}

impl RegionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_miss(&self) {
        self.l2_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_error(&self) {
        self.l2_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backfill(&self) {
        self.backfills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self, duration: Duration) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        update_latency_ema(&self.load_latency_us, duration);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_timeout(&self) {
        self.load_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_read_latency(&self, duration: Duration) {
        update_latency_ema(&self.l2_read_latency_us, duration);
    }

    pub fn record_l2_write_latency(&self, duration: Duration) {
        update_latency_ema(&self.l2_write_latency_us, duration);
    }

    pub fn l2_hits(&self) -> u64 {
        self.l2_hits.load(Ordering::Relaxed)
    }

    pub fn l2_errors(&self) -> u64 {
        self.l2_errors.load(Ordering::Relaxed)
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn coalesced_waits(&self) -> u64 {
        self.coalesced_waits.load(Ordering::Relaxed)
    }

    /// Snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            l2_hits: self.l2_hits(),
            l2_misses: self.l2_misses.load(Ordering::Relaxed),
            l2_errors: self.l2_errors(),
            backfills: self.backfills.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            loads: self.loads(),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            load_timeouts: self.load_timeouts.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits(),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            l2_read_latency_us: self.l2_read_latency_us.load(Ordering::Relaxed),
            l2_write_latency_us: self.l2_write_latency_us.load(Ordering::Relaxed),
            load_latency_us: self.load_latency_us.load(Ordering::Relaxed),
        }
    }
}

fn update_latency_ema(target: &AtomicU64, duration: Duration) {
    let new_us = duration.as_micros() as u64;

    loop {
        let current = target.load(Ordering::Relaxed);
        let updated = if current == 0 {
            new_us
        } else {
            ((1.0 - LATENCY_ALPHA) * current as f64 + LATENCY_ALPHA * new_us as f64) as u64
        };

        if target
            .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

/// Point-in-time metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l2_errors: u64,
    pub backfills: u64,
    pub decode_failures: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub load_timeouts: u64,
    pub coalesced_waits: u64,
    pub writes: u64,
    pub evictions: u64,
    pub l2_read_latency_us: u64,
    pub l2_write_latency_us: u64,
    pub load_latency_us: u64,
}

impl MetricsSnapshot {
    /// Fraction of L1 misses answered by L2
    pub fn l2_hit_ratio(&self) -> f64 {
        let total = self.l2_hits + self.l2_misses;
        if total == 0 {
            0.0
        } else {
            self.l2_hits as f64 / total as f64
        }
    }
}

/// Measures one operation
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
