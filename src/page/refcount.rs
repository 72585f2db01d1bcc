//! Page reference counts
//!
//! One counter per frame behind a single spin lock. The lock is never held
//! while a free-list lock is taken.

use crate::infrastructure::lwlock::{SpinLock, SpinLockGuard};

pub(crate) struct RefCountTable {
    counts: SpinLock<Box<[u32]>>,
}

impl RefCountTable {
    pub fn new(npages: usize) -> Self {
        Self {
            counts: SpinLock::new("pgref", vec![0u32; npages].into_boxed_slice()),
        }
    }

    /// Locks the table for a compound update
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, Box<[u32]>> {
        self.counts.lock()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> u32 {
        self.counts.lock()[idx]
    }

    /// Stores `n` and returns the previous count
    pub fn replace(&self, idx: usize, n: u32) -> u32 {
        let mut counts = self.counts.lock();
        std::mem::replace(&mut counts[idx], n)
    }
}
