//! Per-scenario counters: latency of completed operations and why the
//! others failed

use crate::scenarios::OpError;
use kmem::{BufferError, PageError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Latency buckets are powers of two nanoseconds; the last one is open-ended
const LATENCY_BUCKETS: usize = 40;

fn bucket_of(latency_ns: u64) -> usize {
    let bits = (u64::BITS - latency_ns.leading_zeros()) as usize;
    bits.min(LATENCY_BUCKETS - 1)
}

/// Counters shared by all worker threads of one run
pub struct Metrics {
    completed: AtomicU64,
    latency_sum: AtomicU64,
    latency_max: AtomicU64,
    histogram: [AtomicU64; LATENCY_BUCKETS],
    /// No free page on any core
    out_of_memory: AtomicU64,
    /// Block device failed a transfer
    device_errors: AtomicU64,
    /// Anything else, e.g. a bad configuration surfacing at runtime
    other_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            completed: AtomicU64::new(0),
            latency_sum: AtomicU64::new(0),
            latency_max: AtomicU64::new(0),
            histogram: std::array::from_fn(|_| AtomicU64::new(0)),
            out_of_memory: AtomicU64::new(0),
            device_errors: AtomicU64::new(0),
            other_errors: AtomicU64::new(0),
        }
    }

    /// Records one completed scenario iteration
    pub fn record_completed(&self, latency_ns: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.latency_sum.fetch_add(latency_ns, Ordering::Relaxed);
        self.histogram[bucket_of(latency_ns)].fetch_add(1, Ordering::Relaxed);
        self.latency_max.fetch_max(latency_ns, Ordering::Relaxed);
    }

    /// Records a failed iteration under the subsystem error that stopped it
    pub fn record_failure(&self, err: &OpError) {
        let counter = match err {
            OpError::Page(PageError::OutOfMemory) => &self.out_of_memory,
            OpError::Block(BufferError::Device(_)) => &self.device_errors,
            OpError::Page(_) | OpError::Block(_) => &self.other_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ns(&self) -> u64 {
        match self.completed() {
            0 => 0,
            n => self.latency_sum.load(Ordering::Relaxed) / n,
        }
    }

    pub fn max_latency_ns(&self) -> u64 {
        self.latency_max.load(Ordering::Relaxed)
    }

    /// Upper bound of the histogram bucket holding the `pct`-th percentile
    pub fn percentile_ns(&self, pct: f64) -> u64 {
        let total = self.completed();
        if total == 0 {
            return 0;
        }
        let rank = ((total as f64 * pct / 100.0).ceil() as u64).clamp(1, total);
        let mut seen = 0;
        for (i, bucket) in self.histogram.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= rank {
                return if i == 0 { 0 } else { (1u64 << i) - 1 };
            }
        }
        self.max_latency_ns()
    }

    pub fn out_of_memory(&self) -> u64 {
        self.out_of_memory.load(Ordering::Relaxed)
    }

    pub fn device_errors(&self) -> u64 {
        self.device_errors.load(Ordering::Relaxed)
    }

    pub fn other_errors(&self) -> u64 {
        self.other_errors.load(Ordering::Relaxed)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
