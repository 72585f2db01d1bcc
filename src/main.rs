//! kmem self-check
//!
//! Usage: `kmem [config.json] [disk.img]`
//!
//! An existing disk image is used as is; a missing one is created.
//!
//! Boots the buffer cache and the page allocator, runs a short multi-threaded
//! workload against both and prints their statistics.

// Use jemalloc as global allocator
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

use kmem::infrastructure::clock::WallTicks;
use kmem::infrastructure::cpu::ThreadCpu;
use kmem::infrastructure::logger::StderrLogger;
use kmem::types::{BSIZE, PGSIZE};
use kmem::{BlockDevice, BufferCache, FileDisk, KmemConfig, MemDisk, PageAllocator, PageError};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::sync::Arc;
use std::thread;

const DEV: u32 = 1;
const NBLOCKS: u32 = 256;
const ROUNDS: usize = 5_000;

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => KmemConfig::load(path)?,
        None => KmemConfig::default(),
    };
    StderrLogger::new(config.log_level()?).init()?;

    let (disk, nblocks): (Arc<dyn BlockDevice>, u32) = match args.next() {
        Some(path) => {
            let image = FileDisk::open_or_create(path, DEV, NBLOCKS)?;
            let nblocks = image.nblocks();
            if nblocks == 0 {
                return Err(format!("{} holds no blocks", image.path().display()).into());
            }
            (Arc::new(image), nblocks)
        }
        None => (Arc::new(MemDisk::new(NBLOCKS)), NBLOCKS),
    };
    let cache = BufferCache::new(&config.cache, disk, Arc::new(WallTicks::default()))?;

    let ncpu = config.alloc.ncpu;
    let cpus = Arc::new(ThreadCpu::new(ncpu));
    let kmem = PageAllocator::new(&config.alloc, cpus.clone())?;
    kmem.init_all();
    info!(
        "booted: {} buffers x {} bytes, {} pages x {} bytes on {} cpus",
        cache.nbuf(),
        BSIZE,
        kmem.total_pages(),
        PGSIZE,
        ncpu
    );

    thread::scope(|s| {
        for cpu in 0..ncpu {
            let (cache, kmem, cpus) = (&cache, &kmem, &cpus);
            s.spawn(move || {
                cpus.bind(cpu);
                if let Err(e) = workload(cpu, nblocks, cache, kmem) {
                    warn!("cpu {}: workload failed: {}", cpu, e);
                }
            });
        }
    });

    let cs = cache.stats();
    println!("buffer cache:");
    println!("    hits:          {:>10}", cs.hits);
    println!("    misses:        {:>10}", cs.misses);
    println!("    evictions:     {:>10}", cs.evictions);
    println!("    raced:         {:>10}", cs.raced);
    println!("    device reads:  {:>10}", cs.device_reads);
    println!("    device writes: {:>10}", cs.device_writes);
    println!("    bucket chains: {:?}", cache.bucket_lens());

    let ps = kmem.stats();
    println!("page allocator:");
    println!("    allocations:   {:>10}", ps.allocations);
    println!("    frees:         {:>10}", ps.frees);
    println!("    failed:        {:>10}", ps.failed);
    println!("    steals:        {:>10} ({} pages)", ps.steals, ps.stolen);
    println!("    cow copies:    {:>10}", ps.copies);
    println!("    free pages:    {:>10} / {}", kmem.free_pages(), kmem.total_pages());

    if kmem.free_pages() != kmem.total_pages() {
        return Err("page leak detected".into());
    }
    Ok(())
}

/// Mixed block and page traffic for one core
fn workload(
    cpu: usize,
    nblocks: u32,
    cache: &BufferCache,
    kmem: &PageAllocator,
) -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(cpu as u64);
    let mut held = Vec::new();

    for _ in 0..ROUNDS {
        let blockno = rng.gen_range(0..nblocks);
        let mut b = cache.read(DEV, blockno)?;
        if rng.gen_bool(0.2) {
            b[0] = b[0].wrapping_add(1);
            cache.write(&b)?;
        }
        cache.release(b);

        match rng.gen_range(0..4) {
            0 | 1 if held.len() < 32 => match kmem.allocate() {
                Ok(pa) => held.push(pa),
                Err(PageError::OutOfMemory) => {}
                Err(e) => return Err(e.into()),
            },
            2 if !held.is_empty() => {
                // share a page, then break the sharing the way a fork does
                let pa = held[rng.gen_range(0..held.len())];
                kmem.add_ref(pa);
                match kmem.duplicate(pa) {
                    Ok(copy) if copy != pa => held.push(copy),
                    Ok(_) => {}
                    Err(_) => kmem.free(pa),
                }
            }
            _ => {
                if let Some(pa) = held.pop() {
                    kmem.free(pa);
                }
            }
        }
    }

    for pa in held {
        kmem.free(pa);
    }
    Ok(())
}
