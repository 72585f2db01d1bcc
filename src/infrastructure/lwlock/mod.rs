// LWLock - Lightweight Lock implementations
// Two lock classes: SpinLock for short metadata sections and SleepLock for
// contents that may stay locked across disk I/O.

use parking_lot::{Condvar, Mutex as ParkingLotMutex};
use std::cell::UnsafeCell;
use std::hint::spin_loop;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Context id meaning "nobody"
const NO_CONTEXT: u64 = 0;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXT_ID: u64 = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
}

/// Returns the identity of the calling execution context.
///
/// Lock holders are recorded with this id so `holding()` can answer
/// "is this lock held by me".
#[inline]
pub fn context_id() -> u64 {
    CONTEXT_ID.with(|id| *id)
}

/// A trait that defines a unified interface for exclusive locks
pub trait LockInterface<T> {
    /// The guard type for exclusive locks
    type Guard<'a>: DerefMut<Target = T>
    where
        Self: 'a,
        T: 'a;

    /// Creates a new lock with the given initial value
    fn new(data: T) -> Self;

    /// Acquires an exclusive lock
    fn lock(&self) -> Self::Guard<'_>;

    /// Returns true if the calling context holds the lock. Locks that do
    /// not track their owner never claim to be held.
    fn holding(&self) -> bool;
}

/// Non-blocking mutual exclusion for short critical sections.
///
/// Waiters busy-wait (test-and-test-and-set). Never hold one across
/// anything that may block.
pub struct SpinLock<T> {
    name: &'static str,
    locked: AtomicBool,
    owner: AtomicU64,
    inner: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            owner: AtomicU64::new(NO_CONTEXT),
            inner: UnsafeCell::new(data),
        }
    }

    /// Lock name, for diagnostics
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Try once; returns immediately.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.owner.store(context_id(), Ordering::Relaxed);
            Some(SpinLockGuard::new(self))
        } else {
            None
        }
    }

    /// Spin until acquired, then return a guard.
    ///
    /// Re-acquiring a lock the caller already holds would spin forever,
    /// so it halts instead.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        if self.holding() {
            crate::fatal!("acquire {}: already held", self.name);
        }
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // spin on a plain load until it looks free
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        self.owner.store(context_id(), Ordering::Relaxed);
        SpinLockGuard::new(self)
    }

    /// Returns true if the calling context holds this lock
    #[inline]
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && self.owner.load(Ordering::Relaxed) == context_id()
    }
}

/// Guard for a held [`SpinLock`]. Pinned to the acquiring context.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> SpinLockGuard<'a, T> {
    #[inline]
    fn new(lock: &'a SpinLock<T>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

// Safety: a shared guard only hands out &T.
unsafe impl<T: Sync> Sync for SpinLockGuard<'_, T> {}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.owner.store(NO_CONTEXT, Ordering::Relaxed);
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl<T> LockInterface<T> for SpinLock<T> {
    type Guard<'a>
        = SpinLockGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        SpinLock::new("spin", data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }

    fn holding(&self) -> bool {
        self.holding()
    }
}

/// Holder bookkeeping for a [`SleepLock`]
struct SleepState {
    locked: bool,
    holder: u64,
}

/// Blocking mutual exclusion for long-held contents.
///
/// Waiters are parked rather than spinning, so the holder may keep it
/// across device I/O.
pub struct SleepLock<T> {
    name: &'static str,
    state: ParkingLotMutex<SleepState>,
    wakeup: Condvar,
    inner: UnsafeCell<T>,
}

// Safety: `inner` is only reached through a guard, and at most one guard
// exists at a time (`state.locked`).
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            state: ParkingLotMutex::new(SleepState {
                locked: false,
                holder: NO_CONTEXT,
            }),
            wakeup: Condvar::new(),
            inner: UnsafeCell::new(data),
        }
    }

    /// Lock name, for diagnostics
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Sleeps until the lock is free, then takes it.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let me = context_id();
        let mut state = self.state.lock();
        if state.locked && state.holder == me {
            drop(state);
            crate::fatal!("acquiresleep {}: already held", self.name);
        }
        while state.locked {
            self.wakeup.wait(&mut state);
        }
        state.locked = true;
        state.holder = me;
        SleepLockGuard::new(self)
    }

    /// Takes the lock only if nobody holds it.
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.locked {
            return None;
        }
        state.locked = true;
        state.holder = context_id();
        Some(SleepLockGuard::new(self))
    }

    /// Returns true if the calling context holds this lock
    pub fn holding(&self) -> bool {
        let state = self.state.lock();
        state.locked && state.holder == context_id()
    }

    /// Returns true if anyone holds this lock
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        state.locked = false;
        state.holder = NO_CONTEXT;
        drop(state);
        self.wakeup.notify_one();
    }
}

/// Guard for a held [`SleepLock`]. Pinned to the acquiring context.
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> SleepLockGuard<'a, T> {
    #[inline]
    fn new(lock: &'a SleepLock<T>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// Returns true if the calling context is the recorded holder
    #[inline]
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl<T> LockInterface<T> for SleepLock<T> {
    type Guard<'a>
        = SleepLockGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        SleepLock::new("sleep", data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }

    fn holding(&self) -> bool {
        self.holding()
    }
}

// ParkingLotMutex wrapper, the baseline in lock benchmarks
pub struct ParkingLotMutexWrapper<T> {
    inner: ParkingLotMutex<T>,
}

impl<T> ParkingLotMutexWrapper<T> {
    pub fn new(data: T) -> Self {
        ParkingLotMutexWrapper {
            inner: ParkingLotMutex::new(data),
        }
    }
}

impl<T> LockInterface<T> for ParkingLotMutexWrapper<T> {
    type Guard<'a>
        = parking_lot::MutexGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        ParkingLotMutexWrapper::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.inner.lock()
    }

    /// Always false: parking_lot does not record the owner, so whether the
    /// caller holds the lock cannot be answered. Callers that assert on
    /// `holding()` need a `SpinLock` or `SleepLock`.
    fn holding(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
