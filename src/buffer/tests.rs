// Buffer cache tests

use super::*;
use crate::disk::{DiskError, MemDisk};
use crate::infrastructure::clock::LogicalClock;
use crate::types::{BSIZE, NBUCKET, NBUF};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Barrier;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

const DEV: DeviceId = 1;

/// Block contents carrying the block number
fn stamp(blockno: BlockNo) -> BlockBuf {
    let mut buf = [0u8; BSIZE];
    buf[..4].copy_from_slice(&blockno.to_le_bytes());
    buf[BSIZE - 1] = blockno as u8;
    buf
}

fn stamped_disk(nblocks: BlockNo) -> Arc<MemDisk> {
    let disk = Arc::new(MemDisk::new(nblocks));
    for blockno in 0..nblocks {
        disk.poke(DEV, blockno, &stamp(blockno));
    }
    disk
}

fn cache_with(disk: Arc<MemDisk>, nbuf: usize, nbucket: usize) -> BufferCache {
    let config = CacheConfig {
        nbuf,
        nbucket,
        hash: BucketHash::Xv6,
    };
    BufferCache::new(&config, disk, Arc::new(LogicalClock::new())).unwrap()
}

fn counter(buf: &BlockBuf) -> u64 {
    u64::from_le_bytes(buf[..8].try_into().unwrap())
}

#[test]
fn test_new_spreads_buffers_over_buckets() {
    let cache = cache_with(stamped_disk(4), NBUF, NBUCKET);
    let lens = cache.bucket_lens();
    assert_eq!(lens.len(), NBUCKET);
    assert_eq!(lens.iter().sum::<usize>(), NBUF);
    assert_eq!(&lens[..4], &[3, 3, 3, 3]);
    assert!(lens[4..].iter().all(|&n| n == 2));
    assert_eq!(cache.stats(), CacheStats::default());
}

#[test]
fn test_new_rejects_bad_config() {
    let config = CacheConfig {
        nbuf: 2,
        nbucket: 5,
        hash: BucketHash::Xv6,
    };
    let res = BufferCache::new(&config, stamped_disk(1), Arc::new(LogicalClock::new()));
    assert!(matches!(res, Err(BufferError::Config(_))));
}

#[test]
fn test_read_loads_once_then_hits() {
    let disk = stamped_disk(16);
    let cache = cache_with(disk.clone(), NBUF, NBUCKET);

    let b = cache.read(DEV, 5).unwrap();
    assert!(b.is_valid());
    assert_eq!(b.blockno(), 5);
    assert_eq!(b.dev(), DEV);
    assert_eq!(b.data(), &stamp(5));
    assert_eq!(cache.refcount(b.id()), 1);
    let id = b.id();
    cache.release(b);
    assert_eq!(cache.refcount(id), 0);
    assert!(cache.is_resident(DEV, 5));

    let b = cache.read(DEV, 5).unwrap();
    assert_eq!(b.id(), id);
    assert_eq!(&b[..4], &5u32.to_le_bytes());
    cache.release(b);

    assert_eq!(disk.reads_of(DEV, 5), 1);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.device_reads, 1);
}

#[test]
fn test_write_is_write_through() {
    let disk = stamped_disk(16);
    let cache = cache_with(disk.clone(), NBUF, NBUCKET);

    let mut b = cache.read(DEV, 3).unwrap();
    b[..8].copy_from_slice(&77u64.to_le_bytes());
    cache.write(&b).unwrap();
    cache.release(b);

    assert_eq!(disk.writes_of(DEV, 3), 1);
    assert_eq!(counter(&disk.peek(DEV, 3)), 77);

    // cached copy and a fresh cache over the same disk agree
    let b = cache.read(DEV, 3).unwrap();
    assert_eq!(counter(b.data()), 77);
    cache.release(b);
    let other = cache_with(disk.clone(), NBUF, NBUCKET);
    let b = other.read(DEV, 3).unwrap();
    assert_eq!(counter(b.data()), 77);
    drop(b);
    assert_eq!(cache.stats().device_writes, 1);
}

#[test]
fn test_acquire_does_not_read() {
    let disk = stamped_disk(16);
    let cache = cache_with(disk.clone(), NBUF, NBUCKET);

    let mut b = cache.acquire(DEV, 9);
    assert!(!b.is_valid());
    b.data_mut().fill(0xab);
    cache.write(&b).unwrap();
    cache.release(b);
    assert_eq!(disk.reads(), 0);

    // never marked valid, so the next read goes to the device
    let b = cache.read(DEV, 9).unwrap();
    assert!(b.iter().all(|&x| x == 0xab));
    drop(b);
    assert_eq!(disk.reads_of(DEV, 9), 1);
}

#[test]
fn test_guard_drop_releases() {
    let cache = cache_with(stamped_disk(4), 2, 1);
    let id = {
        let b = cache.read(DEV, 0).unwrap();
        b.id()
    };
    assert_eq!(cache.refcount(id), 0);
    // the content lock is free again
    let b = cache.read(DEV, 0).unwrap();
    assert_eq!(b.id(), id);
}

#[test]
fn test_lru_replacement_across_buckets() {
    let disk = stamped_disk(64);
    let cache = cache_with(disk.clone(), NBUF, NBUCKET);

    for blockno in 0..=40 {
        let b = cache.read(DEV, blockno).unwrap();
        assert_eq!(b.data(), &stamp(blockno));
        cache.release(b);
    }
    assert_eq!(disk.reads(), 41);
    for blockno in 0..=10 {
        assert!(!cache.is_resident(DEV, blockno), "block {} resident", blockno);
    }
    for blockno in 11..=40 {
        assert!(cache.is_resident(DEV, blockno), "block {} evicted", blockno);
    }

    for blockno in [40, 39, 38] {
        let b = cache.read(DEV, blockno).unwrap();
        assert_eq!(b.data(), &stamp(blockno));
        cache.release(b);
    }
    assert_eq!(disk.reads(), 41);

    let b = cache.read(DEV, 0).unwrap();
    assert_eq!(b.data(), &stamp(0));
    cache.release(b);
    assert_eq!(disk.reads(), 42);
    assert!(!cache.is_resident(DEV, 11));
    assert!(cache.is_resident(DEV, 12));

    let stats = cache.stats();
    assert_eq!(stats.misses, 42);
    assert_eq!(stats.evictions, 42);
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.raced, 0);
    assert_eq!(cache.bucket_lens().iter().sum::<usize>(), NBUF);
}

#[test]
fn test_last_use_is_monotonic() {
    let cache = cache_with(stamped_disk(16), NBUF, NBUCKET);
    let mut prev = 0;
    for blockno in [0, 1, 2, 1, 0, 7, 2] {
        let b = cache.read(DEV, blockno).unwrap();
        let id = b.id();
        cache.release(b);
        let now = cache.last_use(id);
        assert!(now > prev);
        prev = now;
    }
}

#[test]
fn test_pinned_block_stays_resident() {
    let disk = stamped_disk(32);
    let cache = cache_with(disk.clone(), 4, 2);

    let b = cache.read(DEV, 0).unwrap();
    let id = b.id();
    cache.pin(id);
    assert_eq!(cache.refcount(id), 2);
    cache.release(b);
    assert_eq!(cache.refcount(id), 1);

    for blockno in 1..20 {
        let b = cache.read(DEV, blockno).unwrap();
        cache.release(b);
    }
    assert!(cache.is_resident(DEV, 0));
    assert_eq!(disk.reads_of(DEV, 0), 1);

    cache.unpin(id);
    assert_eq!(cache.refcount(id), 0);
    for blockno in 1..20 {
        let b = cache.read(DEV, blockno).unwrap();
        cache.release(b);
    }
    assert!(!cache.is_resident(DEV, 0));
}

#[test]
#[should_panic(expected = "refcount underflow")]
fn test_unpin_unreferenced_panics() {
    let cache = cache_with(stamped_disk(4), 2, 1);
    let b = cache.read(DEV, 0).unwrap();
    let id = b.id();
    cache.release(b);
    cache.unpin(id);
}

#[test]
#[should_panic(expected = "bpin: buffer")]
fn test_pin_unreferenced_panics() {
    let cache = cache_with(stamped_disk(4), 2, 1);
    let b = cache.read(DEV, 0).unwrap();
    let id = b.id();
    cache.release(b);
    cache.pin(id);
}

#[test]
#[should_panic(expected = "bget: no buffers")]
fn test_exhausted_pool_panics() {
    let cache = cache_with(stamped_disk(4), 2, 1);
    let _a = cache.read(DEV, 0).unwrap();
    let _b = cache.read(DEV, 1).unwrap();
    let _c = cache.read(DEV, 2);
}

#[test]
#[should_panic(expected = "brelse")]
fn test_release_into_wrong_cache_panics() {
    let disk = stamped_disk(4);
    let a = cache_with(disk.clone(), 2, 1);
    let b = cache_with(disk, 2, 1);
    let guard = a.read(DEV, 0).unwrap();
    b.release(guard);
}

#[test]
fn test_device_error_propagates() {
    let disk = stamped_disk(4);
    let cache = cache_with(disk.clone(), 2, 1);

    let res = cache.read(DEV, 10);
    assert!(matches!(
        res,
        Err(BufferError::Device(DiskError::OutOfRange { dev: DEV, blockno: 10 }))
    ));
    drop(res);
    assert!(!cache.is_resident(DEV, 10));

    // the failed buffer is unreferenced and is retried, not served stale
    assert!(cache.read(DEV, 10).is_err());
    assert_eq!(cache.stats().device_reads, 0);

    let b = cache.read(DEV, 1).unwrap();
    assert_eq!(b.data(), &stamp(1));
}

#[test]
fn test_concurrent_cold_read_loads_once() {
    let disk = Arc::new(MemDisk::with_latency(64, Duration::from_millis(30)));
    disk.poke(DEV, 7, &stamp(7));
    let cache = cache_with(disk.clone(), NBUF, NBUCKET);
    let barrier = Barrier::new(2);
    let done = AtomicUsize::new(0);

    let ids: Vec<BufId> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    let b = cache.read(DEV, 7).unwrap();
                    assert_eq!(b.data(), &stamp(7));
                    // stay referenced until the other reader has a reference too
                    while done.load(Ordering::SeqCst) == 0 && cache.refcount(b.id()) < 2 {
                        thread::yield_now();
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                    let id = b.id();
                    cache.release(b);
                    id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // both readers were handed the same buffer
    assert_eq!(ids[0], ids[1]);
    assert_eq!(disk.reads_of(DEV, 7), 1);
    assert_eq!(cache.resident_copies(DEV, 7), 1);
}

#[test]
fn test_concurrent_readers_keep_blocks_unique() {
    const NBLOCKS: BlockNo = 64;
    let disk = stamped_disk(NBLOCKS);
    let cache = cache_with(disk.clone(), NBUF, NBUCKET);

    thread::scope(|s| {
        for t in 0..8u64 {
            let cache = &cache;
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(t);
                for i in 0..2000 {
                    let blockno = rng.gen_range(0..NBLOCKS);
                    let b = cache.read(DEV, blockno).unwrap();
                    assert_eq!(&b[..4], &blockno.to_le_bytes());
                    cache.release(b);
                    if i % 100 == 0 {
                        assert!(cache.resident_copies(DEV, blockno) <= 1);
                    }
                }
            });
        }
    });

    for blockno in 0..NBLOCKS {
        assert!(cache.resident_copies(DEV, blockno) <= 1);
    }
    assert_eq!(cache.bucket_lens().iter().sum::<usize>(), NBUF);
    for idx in 0..NBUF {
        assert_eq!(cache.refcount(BufId(idx)), 0);
    }
    let stats = cache.stats();
    assert_eq!(stats.hits + stats.misses, 8 * 2000);
    assert_eq!(stats.device_reads, disk.reads());
}

#[test]
fn test_concurrent_writers_survive_eviction() {
    const THREADS: u32 = 4;
    const PER_THREAD: u32 = 3;
    const ROUNDS: u64 = 200;
    let disk = Arc::new(MemDisk::new(64));
    let cache = cache_with(disk.clone(), 6, 3);

    thread::scope(|s| {
        for t in 0..THREADS {
            let cache = &cache;
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    for k in 0..PER_THREAD {
                        let blockno = t * PER_THREAD + k;
                        let mut b = cache.read(DEV, blockno).unwrap();
                        let n = counter(b.data()) + 1;
                        b[..8].copy_from_slice(&n.to_le_bytes());
                        cache.write(&b).unwrap();
                        cache.release(b);
                    }
                }
            });
        }
    });

    for blockno in 0..THREADS * PER_THREAD {
        assert_eq!(counter(&disk.peek(DEV, blockno)), ROUNDS);
    }
    assert!(cache.stats().evictions > 6);
}
