//! Buffer descriptors
//!
//! Metadata of one pool slot. Identity, refcount, flags, `last_use` and the
//! chain link change only under the lock of the bucket the buffer is linked
//! into (or, while unlinked during eviction, by the evicting context alone).
//! They are atomics so the arena can be shared; the bucket lock provides the
//! ordering, so relaxed accesses suffice. The payload sits behind the
//! content lock.

use crate::infrastructure::lwlock::SleepLock;
use crate::types::{BSIZE, BlockBuf, BlockNo, DeviceId, Ticks};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// End of a bucket chain
pub(crate) const NIL: usize = usize::MAX;

/// State bit layout (64-bit AtomicU64):
///
/// Bits 0:       Reusable flag (1 = not bound to a live identity)
/// Bits 1-7:     Reserved
/// Bits 8-63:    Reference count
///
/// +---+-------+-------------------------------------------------------+
/// | R | RSVD  |              Ref Count (56 bits)                      |
/// +---+-------+-------------------------------------------------------+
///  0   1-7                         8-63
const REUSABLE_BIT: u64 = 1 << 0;
const REFCOUNT_SHIFT: u8 = 8;
const REFCOUNT_MAX: u64 = u64::MAX >> REFCOUNT_SHIFT;

/// (device, block) identity of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferTag {
    pub dev: DeviceId,
    pub blockno: BlockNo,
}

impl BufferTag {
    /// Identity of a buffer that has never held a block
    pub const INVALID: BufferTag = BufferTag {
        dev: DeviceId::MAX,
        blockno: BlockNo::MAX,
    };

    #[inline]
    pub fn new(dev: DeviceId, blockno: BlockNo) -> Self {
        Self { dev, blockno }
    }

    #[inline]
    fn pack(self) -> u64 {
        ((self.dev as u64) << 32) | self.blockno as u64
    }

    #[inline]
    fn unpack(raw: u64) -> Self {
        Self {
            dev: (raw >> 32) as DeviceId,
            blockno: raw as BlockNo,
        }
    }
}

/// One slot of the buffer pool
/// Aligned to cache line size to prevent false sharing
#[cfg_attr(any(target_arch = "x86", target_arch = "x86_64"), repr(align(64)))]
#[cfg_attr(any(target_arch = "arm", target_arch = "aarch64"), repr(align(128)))]
pub struct BufferDesc {
    tag: AtomicU64,
    /// Reusable bit + refcount
    state: AtomicU64,
    /// Payload holds the block's disk contents
    valid: AtomicBool,
    last_use: AtomicU64,
    /// Next slot in the bucket chain, or `NIL`
    next: AtomicUsize,
    /// Content lock guarding the payload
    pub(crate) content: SleepLock<Box<BlockBuf>>,
}

impl BufferDesc {
    /// A reusable, invalid, unlinked buffer
    pub(crate) fn new() -> Self {
        Self {
            tag: AtomicU64::new(BufferTag::INVALID.pack()),
            state: AtomicU64::new(REUSABLE_BIT),
            valid: AtomicBool::new(false),
            last_use: AtomicU64::new(0),
            next: AtomicUsize::new(NIL),
            content: SleepLock::new("buffer", Box::new([0u8; BSIZE])),
        }
    }

    #[inline]
    pub fn tag(&self) -> BufferTag {
        BufferTag::unpack(self.tag.load(Ordering::Relaxed))
    }

    /// Binds the buffer to a new identity: not reusable, invalid, one reference
    pub(crate) fn assign(&self, tag: BufferTag) {
        self.tag.store(tag.pack(), Ordering::Relaxed);
        self.valid.store(false, Ordering::Relaxed);
        self.state.store(1 << REFCOUNT_SHIFT, Ordering::Relaxed);
    }

    /// Detaches the buffer from its identity and makes it the preferred victim
    pub(crate) fn discard(&self) {
        self.state.fetch_or(REUSABLE_BIT, Ordering::Relaxed);
        self.last_use.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_reusable(&self) -> bool {
        self.state.load(Ordering::Relaxed) & REUSABLE_BIT != 0
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_valid(&self) {
        self.valid.store(true, Ordering::Release);
    }

    /// True if the slot holds a live entry for `tag`
    #[inline]
    pub(crate) fn matches(&self, tag: BufferTag) -> bool {
        !self.is_reusable() && self.tag() == tag
    }

    /// Eligible as an eviction victim
    #[inline]
    pub(crate) fn can_evict(&self) -> bool {
        self.is_reusable() || self.refcount() == 0
    }

    /// Increments refcount and returns new count
    #[inline]
    pub(crate) fn pin(&self) -> u64 {
        let mut old_state = self.state.load(Ordering::Acquire);
        loop {
            let refcount = old_state >> REFCOUNT_SHIFT;
            if refcount >= REFCOUNT_MAX {
                crate::fatal!("bpin: refcount overflow");
            }
            let new_state = old_state + (1 << REFCOUNT_SHIFT);
            match self.state.compare_exchange_weak(
                old_state,
                new_state,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return refcount + 1,
                Err(e) => old_state = e,
            }
        }
    }

    /// Decrements refcount and returns new count
    #[inline]
    pub(crate) fn unpin(&self) -> u64 {
        let mut old_state = self.state.load(Ordering::Acquire);
        loop {
            let refcount = old_state >> REFCOUNT_SHIFT;
            if refcount == 0 {
                crate::fatal!("bunpin: refcount underflow on {:?}", self.tag());
            }
            let new_state = old_state - (1 << REFCOUNT_SHIFT);
            match self.state.compare_exchange_weak(
                old_state,
                new_state,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return refcount - 1,
                Err(e) => old_state = e,
            }
        }
    }

    /// Returns current refcount
    #[inline]
    pub fn refcount(&self) -> u64 {
        self.state.load(Ordering::Relaxed) >> REFCOUNT_SHIFT
    }

    #[inline]
    pub fn last_use(&self) -> Ticks {
        self.last_use.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_last_use(&self, now: Ticks) {
        self.last_use.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn next(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_next(&self, next: usize) {
        self.next.store(next, Ordering::Relaxed);
    }
}
