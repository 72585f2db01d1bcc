//! Block buffer cache
//!
//! A fixed pool of block buffers split over hash-bucketed shards. Each
//! bucket owns a chain of buffers and a spin lock; a buffer's content has
//! its own sleep lock that may be held across disk I/O.
//!
//! Lock rules:
//! * a content lock is only requested after every bucket lock is released;
//! * more than one bucket lock is held only during the eviction scan, taken
//!   in ascending bucket order, keeping at most the current best;
//! * `release` drops the content lock before taking the bucket lock.

pub mod desc;
pub mod error;

pub use desc::{BufferDesc, BufferTag};
pub use error::{BufferError, BufferResult};

use crate::config::CacheConfig;
use crate::disk::BlockDevice;
use crate::infrastructure::clock::TickSource;
use crate::infrastructure::hash::BucketHash;
use crate::infrastructure::lwlock::{SleepLockGuard, SpinLock, SpinLockGuard};
use crate::types::{BlockBuf, BlockNo, DeviceId, Ticks};
use desc::NIL;
use log::{debug, trace};
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{ptr, thread};

/// Stable index of a pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufId(usize);

impl BufId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Head of one bucket's chain
struct Chain {
    head: usize,
    len: usize,
}

impl Chain {
    const fn new() -> Self {
        Self { head: NIL, len: 0 }
    }
}

/// Walks a chain by slot index
struct ChainIter<'a> {
    descs: &'a [BufferDesc],
    cur: usize,
}

impl Iterator for ChainIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cur == NIL {
            return None;
        }
        let idx = self.cur;
        self.cur = self.descs[idx].next();
        Some(idx)
    }
}

/// Best eviction candidate so far, with its bucket still locked
struct Victim<'a> {
    bucket: usize,
    idx: usize,
    last_use: Ticks,
    chain: SpinLockGuard<'a, Chain>,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    raced: AtomicU64,
    device_reads: AtomicU64,
    device_writes: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups satisfied by the bucket fast path
    pub hits: u64,
    /// Lookups that went to the eviction scan
    pub misses: u64,
    /// Buffers rebound to a new identity
    pub evictions: u64,
    /// Misses resolved by an entry another context installed meanwhile
    pub raced: u64,
    pub device_reads: u64,
    pub device_writes: u64,
}

pub struct BufferCache {
    descs: Box<[BufferDesc]>,
    buckets: Box<[SpinLock<Chain>]>,
    hash: BucketHash,
    disk: Arc<dyn BlockDevice>,
    clock: Arc<dyn TickSource>,
    counters: CacheCounters,
}

impl BufferCache {
    /// Builds the pool and deals buffers round-robin over the buckets
    pub fn new(
        config: &CacheConfig,
        disk: Arc<dyn BlockDevice>,
        clock: Arc<dyn TickSource>,
    ) -> BufferResult<Self> {
        config.validate()?;

        let descs: Box<[BufferDesc]> = (0..config.nbuf).map(|_| BufferDesc::new()).collect();
        let buckets: Box<[SpinLock<Chain>]> = (0..config.nbucket)
            .map(|_| SpinLock::new("bcache.bucket", Chain::new()))
            .collect();

        let cache = BufferCache {
            descs,
            buckets,
            hash: config.hash,
            disk,
            clock,
            counters: CacheCounters::default(),
        };
        for idx in 0..config.nbuf {
            let mut chain = cache.buckets[idx % config.nbucket].lock();
            cache.chain_push(&mut chain, idx);
        }

        debug!(
            "binit: {} buffers in {} buckets ({:?} hash)",
            config.nbuf, config.nbucket, config.hash
        );
        Ok(cache)
    }

    /// Returns a locked buffer holding the contents of the block
    pub fn read(&self, dev: DeviceId, blockno: BlockNo) -> BufferResult<BufGuard<'_>> {
        let mut b = self.acquire(dev, blockno);
        let desc = &self.descs[b.idx];
        if !desc.is_valid() {
            // on error the guard is dropped and the buffer released still invalid
            self.disk.read(dev, blockno, b.data_mut())?;
            bump(&self.counters.device_reads);
            desc.set_valid();
        }
        Ok(b)
    }

    /// Writes the buffer's contents to disk. The caller must hold it.
    pub fn write(&self, b: &BufGuard<'_>) -> BufferResult<()> {
        self.check_holder(b, "bwrite");
        let tag = self.descs[b.idx].tag();
        self.disk.write(tag.dev, tag.blockno, b.data())?;
        bump(&self.counters.device_writes);
        Ok(())
    }

    /// Releases a locked buffer
    pub fn release(&self, b: BufGuard<'_>) {
        self.check_holder(&b, "brelse");
        drop(b);
    }

    /// Takes an extra reference that keeps the block resident.
    ///
    /// The caller must already reference the buffer (e.g. hold it locked).
    pub fn pin(&self, id: BufId) {
        let desc = &self.descs[id.0];
        let _chain = self.buckets[self.bucket_of(desc.tag())].lock();
        if desc.refcount() == 0 {
            crate::fatal!("bpin: buffer {} is not referenced", id.0);
        }
        desc.pin();
    }

    /// Drops a reference taken with [`BufferCache::pin`]
    pub fn unpin(&self, id: BufId) {
        let desc = &self.descs[id.0];
        let _chain = self.buckets[self.bucket_of(desc.tag())].lock();
        if desc.unpin() == 0 {
            desc.set_last_use(self.clock.ticks());
        }
    }

    /// Returns a locked buffer for the block without reading it.
    ///
    /// Concurrent callers for the same block all end up with the same buffer.
    pub fn acquire(&self, dev: DeviceId, blockno: BlockNo) -> BufGuard<'_> {
        let tag = BufferTag::new(dev, blockno);
        let idx = self.get_slot(tag);
        // every bucket lock is released by now
        let data = self.descs[idx].content.lock();
        BufGuard {
            cache: self,
            idx,
            data: ManuallyDrop::new(data),
        }
    }

    /// Finds or installs the entry for `tag` and takes a reference to it
    fn get_slot(&self, tag: BufferTag) -> usize {
        let key = self.bucket_of(tag);

        {
            let chain = self.buckets[key].lock();
            if let Some(idx) = self.chain_lookup(&chain, tag) {
                self.descs[idx].pin();
                bump(&self.counters.hits);
                trace!("bget: hit {:?} in bucket {}", tag, key);
                return idx;
            }
        }
        bump(&self.counters.misses);

        let Victim {
            bucket,
            idx: victim,
            mut chain,
            ..
        } = self.find_victim();
        self.chain_unlink(&mut chain, victim);

        let mut chain = if bucket == key {
            chain
        } else {
            drop(chain);
            self.buckets[key].lock()
        };

        // nothing was locked between the fast-path miss and here
        if let Some(idx) = self.chain_lookup(&chain, tag) {
            self.descs[victim].discard();
            self.chain_push(&mut chain, victim);
            self.descs[idx].pin();
            bump(&self.counters.raced);
            debug!("bget: {:?} installed concurrently, dropping victim {}", tag, victim);
            return idx;
        }

        let desc = &self.descs[victim];
        debug!(
            "bget: evict {:?} from bucket {} for {:?} in bucket {}",
            desc.tag(),
            bucket,
            tag,
            key
        );
        desc.assign(tag);
        self.chain_push(&mut chain, victim);
        bump(&self.counters.evictions);
        victim
    }

    /// Scans every bucket for the least recently used reusable buffer.
    ///
    /// Returns with only the winner's bucket locked. Halts if no buffer in
    /// the pool is reusable.
    fn find_victim(&self) -> Victim<'_> {
        let mut best: Option<Victim<'_>> = None;
        for (bucket, lock) in self.buckets.iter().enumerate() {
            let chain = lock.lock();
            let Some((idx, last_use)) = self.chain_oldest(&chain) else {
                continue;
            };
            if best.as_ref().is_none_or(|b| last_use < b.last_use) {
                // drops the previous best's guard after this one is taken
                best = Some(Victim {
                    bucket,
                    idx,
                    last_use,
                    chain,
                });
            }
        }
        match best {
            Some(victim) => victim,
            None => crate::fatal!("bget: no buffers"),
        }
    }

    fn check_holder(&self, b: &BufGuard<'_>, op: &str) {
        if !ptr::eq(b.cache, self) || !self.descs[b.idx].content.holding() {
            crate::fatal!("{}: buffer not locked by caller", op);
        }
    }

    /// Second half of release, run when a guard is dropped
    fn release_slot(&self, idx: usize) {
        let desc = &self.descs[idx];
        let _chain = self.buckets[self.bucket_of(desc.tag())].lock();
        if desc.unpin() == 0 {
            desc.set_last_use(self.clock.ticks());
        }
    }

    #[inline]
    fn bucket_of(&self, tag: BufferTag) -> usize {
        self.hash.bucket(tag.dev, tag.blockno, self.buckets.len())
    }

    fn chain_iter(&self, chain: &Chain) -> ChainIter<'_> {
        ChainIter {
            descs: &self.descs,
            cur: chain.head,
        }
    }

    fn chain_push(&self, chain: &mut Chain, idx: usize) {
        self.descs[idx].set_next(chain.head);
        chain.head = idx;
        chain.len += 1;
    }

    fn chain_unlink(&self, chain: &mut Chain, idx: usize) {
        let next = self.descs[idx].next();
        if chain.head == idx {
            chain.head = next;
        } else {
            let mut prev = chain.head;
            loop {
                if prev == NIL {
                    crate::fatal!("bget: buffer {} missing from its bucket", idx);
                }
                let after = self.descs[prev].next();
                if after == idx {
                    self.descs[prev].set_next(next);
                    break;
                }
                prev = after;
            }
        }
        self.descs[idx].set_next(NIL);
        chain.len -= 1;
    }

    fn chain_lookup(&self, chain: &Chain, tag: BufferTag) -> Option<usize> {
        self.chain_iter(chain).find(|&idx| self.descs[idx].matches(tag))
    }

    /// Reusable entry with the smallest `last_use`, first one on ties
    fn chain_oldest(&self, chain: &Chain) -> Option<(usize, Ticks)> {
        self.chain_iter(chain)
            .filter(|&idx| self.descs[idx].can_evict())
            .map(|idx| (idx, self.descs[idx].last_use()))
            .min_by_key(|&(_, last_use)| last_use)
    }

    /// Buffers in the pool
    #[inline]
    pub fn nbuf(&self) -> usize {
        self.descs.len()
    }

    /// Hash buckets
    #[inline]
    pub fn nbucket(&self) -> usize {
        self.buckets.len()
    }

    /// Current references to a buffer
    pub fn refcount(&self, id: BufId) -> u64 {
        self.descs[id.0].refcount()
    }

    /// Tick stamped when the buffer last became unreferenced
    pub fn last_use(&self, id: BufId) -> Ticks {
        self.descs[id.0].last_use()
    }

    /// True if a loaded, live entry for the block is cached
    pub fn is_resident(&self, dev: DeviceId, blockno: BlockNo) -> bool {
        let tag = BufferTag::new(dev, blockno);
        let chain = self.buckets[self.bucket_of(tag)].lock();
        self.chain_lookup(&chain, tag)
            .is_some_and(|idx| self.descs[idx].is_valid())
    }

    /// Live entries for the block across the whole pool.
    ///
    /// Locks every bucket in ascending order for a consistent view.
    pub fn resident_copies(&self, dev: DeviceId, blockno: BlockNo) -> usize {
        let tag = BufferTag::new(dev, blockno);
        let chains: Vec<_> = self.buckets.iter().map(|b| b.lock()).collect();
        chains
            .iter()
            .map(|chain| {
                self.chain_iter(chain)
                    .filter(|&idx| self.descs[idx].matches(tag))
                    .count()
            })
            .sum()
    }

    /// Chain length of every bucket
    pub fn bucket_lens(&self) -> Vec<usize> {
        self.buckets.iter().map(|b| b.lock().len).collect()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            raced: c.raced.load(Ordering::Relaxed),
            device_reads: c.device_reads.load(Ordering::Relaxed),
            device_writes: c.device_writes.load(Ordering::Relaxed),
        }
    }
}

/// A buffer whose content lock the caller holds.
///
/// Dropping the guard releases the buffer.
pub struct BufGuard<'a> {
    cache: &'a BufferCache,
    idx: usize,
    data: ManuallyDrop<SleepLockGuard<'a, Box<BlockBuf>>>,
}

impl BufGuard<'_> {
    #[inline]
    pub fn id(&self) -> BufId {
        BufId(self.idx)
    }

    #[inline]
    pub fn tag(&self) -> BufferTag {
        self.cache.descs[self.idx].tag()
    }

    #[inline]
    pub fn dev(&self) -> DeviceId {
        self.tag().dev
    }

    #[inline]
    pub fn blockno(&self) -> BlockNo {
        self.tag().blockno
    }

    /// True once the payload holds the block's disk contents
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.cache.descs[self.idx].is_valid()
    }

    #[inline]
    pub fn data(&self) -> &BlockBuf {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut BlockBuf {
        &mut self.data
    }
}

impl Deref for BufGuard<'_> {
    type Target = BlockBuf;
    fn deref(&self) -> &BlockBuf {
        self.data()
    }
}

impl DerefMut for BufGuard<'_> {
    fn deref_mut(&mut self) -> &mut BlockBuf {
        self.data_mut()
    }
}

impl Drop for BufGuard<'_> {
    fn drop(&mut self) {
        if !self.data.holding() && !thread::panicking() {
            crate::fatal!("brelse: buffer not locked by caller");
        }
        // SAFETY: `data` is dropped exactly once, here, and not touched after.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.cache.release_slot(self.idx);
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
