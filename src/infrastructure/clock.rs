//! Monotonic tick sources
//!
//! The buffer cache stamps `last_use` with the current tick when a buffer
//! becomes unreferenced. In the kernel that counter is advanced by the timer
//! interrupt; here it is any `TickSource`.

use crate::types::Ticks;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Supplier of a non-decreasing tick counter
pub trait TickSource: Send + Sync {
    /// Current tick
    fn ticks(&self) -> Ticks;
}

/// Counter that advances by one on every read.
///
/// Gives every release a distinct stamp, so LRU order is exact.
#[derive(Debug, Default)]
pub struct LogicalClock {
    now: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }
}

impl TickSource for LogicalClock {
    #[inline]
    fn ticks(&self) -> Ticks {
        self.now.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Wall-clock ticks of fixed length since construction
#[derive(Debug)]
pub struct WallTicks {
    start: Instant,
    tick: Duration,
}

impl WallTicks {
    /// Timer interrupt period used by the kernel (10 ms)
    pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

    pub fn new(tick: Duration) -> Self {
        Self {
            start: Instant::now(),
            tick: tick.max(Duration::from_nanos(1)),
        }
    }
}

impl Default for WallTicks {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TICK)
    }
}

impl TickSource for WallTicks {
    fn ticks(&self) -> Ticks {
        (self.start.elapsed().as_nanos() / self.tick.as_nanos()) as Ticks
    }
}
