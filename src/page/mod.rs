//! Physical page allocator
//!
//! Whole `PGSIZE` pages of simulated physical memory, handed out from one
//! free list per core. A core whose list runs dry steals a batch from the
//! others. A reference-count table lets pages be shared copy-on-write.
//!
//! Lock rules:
//! * at most one free-list lock is held at a time;
//! * the refcount lock is never held while a free-list lock is taken.

pub mod error;
pub(crate) mod freelist;
pub mod phys;
pub(crate) mod refcount;

pub use error::{PageError, PageResult};
pub use phys::{PhysAddr, PhysMemory};

use crate::config::AllocConfig;
use crate::infrastructure::cpu::CpuAccessor;
use crate::infrastructure::lwlock::SpinLock;
use crate::types::{ALLOC_FILL, CpuId, FREE_FILL, PGSIZE, PageBuf};
use freelist::{FreeList, NIL};
use log::{debug, trace, warn};
use refcount::RefCountTable;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Free list of one core
/// Aligned to cache line size to prevent false sharing
#[cfg_attr(any(target_arch = "x86", target_arch = "x86_64"), repr(align(64)))]
#[cfg_attr(any(target_arch = "arm", target_arch = "aarch64"), repr(align(128)))]
struct PerCpu {
    free: SpinLock<FreeList>,
}

#[derive(Default)]
struct AllocCounters {
    allocations: AtomicU64,
    frees: AtomicU64,
    failed: AtomicU64,
    steals: AtomicU64,
    stolen: AtomicU64,
    copies: AtomicU64,
}

/// Snapshot of allocator activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub allocations: u64,
    /// Frees that returned a page to a list
    pub frees: u64,
    pub failed: u64,
    /// Steal sessions that moved at least one page
    pub steals: u64,
    pub stolen: u64,
    /// Pages copied by `duplicate`
    pub copies: u64,
}

pub struct PageAllocator {
    mem: PhysMemory,
    links: Box<[AtomicUsize]>,
    cpus: Box<[PerCpu]>,
    refs: RefCountTable,
    steal_batch: usize,
    accessor: Arc<dyn CpuAccessor>,
    /// Frame indices handed over by `init`
    managed: OnceLock<Range<usize>>,
    counters: AllocCounters,
}

impl PageAllocator {
    /// Builds an allocator over fresh simulated memory. No page is free
    /// until [`PageAllocator::init`] runs.
    pub fn new(config: &AllocConfig, accessor: Arc<dyn CpuAccessor>) -> PageResult<Self> {
        config.validate()?;

        let mem = PhysMemory::new(config.phys_base, config.phys_pages);
        let links = (0..config.phys_pages)
            .map(|_| AtomicUsize::new(NIL))
            .collect();
        let cpus = (0..config.ncpu)
            .map(|_| PerCpu {
                free: SpinLock::new("kmem", FreeList::new()),
            })
            .collect();

        Ok(Self {
            refs: RefCountTable::new(config.phys_pages),
            mem,
            links,
            cpus,
            steal_batch: config.steal_batch,
            accessor,
            managed: OnceLock::new(),
            counters: AllocCounters::default(),
        })
    }

    /// Hands every whole page in `[low, high)` to the calling core's list.
    ///
    /// `low` is rounded up to a page boundary. May run once.
    pub fn init(&self, low: PhysAddr, high: PhysAddr) {
        let start = low.page_round_up();
        if start < self.mem.base() || high > self.mem.end() {
            crate::fatal!(
                "kinit: [{}, {}) outside physical memory [{}, {})",
                low,
                high,
                self.mem.base(),
                self.mem.end()
            );
        }
        let base = self.mem.base().as_u64();
        let lo = ((start.as_u64() - base) / PGSIZE as u64) as usize;
        let hi = ((high.as_u64().saturating_sub(base) / PGSIZE as u64) as usize).max(lo);
        if self.managed.set(lo..hi).is_err() {
            crate::fatal!("kinit: already initialised");
        }

        let cpu = self.current_cpu();
        for idx in lo..hi {
            self.refs.replace(idx, 0);
            self.release_page(cpu, idx);
        }
        debug!(
            "kinit: {} pages [{}, {}) on cpu {}",
            hi - lo,
            self.mem.addr_of(lo),
            self.mem.addr_of(hi),
            cpu
        );
    }

    /// Hands the whole simulated memory to the calling core
    pub fn init_all(&self) {
        self.init(self.mem.base(), self.mem.end());
    }

    /// Allocates a page on the calling core
    pub fn allocate(&self) -> PageResult<PhysAddr> {
        self.allocate_on(self.current_cpu())
    }

    /// Allocates a page for `cpu`, stealing from other cores if its list is
    /// empty. The page comes back with refcount 1, filled with `ALLOC_FILL`.
    pub fn allocate_on(&self, cpu: CpuId) -> PageResult<PhysAddr> {
        self.check_cpu(cpu, "kalloc");
        let idx = match self.pop(cpu) {
            Some(idx) => idx,
            None => {
                self.steal(cpu);
                match self.pop(cpu) {
                    Some(idx) => idx,
                    None => {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("kalloc: out of memory on cpu {}", cpu);
                        return Err(PageError::OutOfMemory);
                    }
                }
            }
        };

        let pa = self.mem.addr_of(idx);
        let old = self.refs.replace(idx, 1);
        if old != 0 {
            crate::fatal!("kalloc: free page {} has refcount {}", pa, old);
        }
        self.mem.frame(idx).write().fill(ALLOC_FILL);
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        trace!("kalloc: {} on cpu {}", pa, cpu);
        Ok(pa)
    }

    /// Drops a reference from the calling core
    pub fn free(&self, pa: PhysAddr) {
        self.free_on(self.current_cpu(), pa)
    }

    /// Drops a reference to `pa`. The last reference returns the page,
    /// filled with `FREE_FILL`, to `cpu`'s list.
    pub fn free_on(&self, cpu: CpuId, pa: PhysAddr) {
        self.check_cpu(cpu, "kfree");
        let idx = self.page_index(pa, "kfree");

        let left = {
            let mut counts = self.refs.lock();
            if counts[idx] == 0 {
                crate::fatal!("kfree: double free of {}", pa);
            }
            counts[idx] -= 1;
            counts[idx]
        };
        if left > 0 {
            trace!("kfree: {} still has {} references", pa, left);
            return;
        }

        self.release_page(cpu, idx);
        self.counters.frees.fetch_add(1, Ordering::Relaxed);
        trace!("kfree: {} to cpu {}", pa, cpu);
    }

    /// Adds a reference to an allocated page
    pub fn add_ref(&self, pa: PhysAddr) {
        let idx = self.page_index(pa, "kincref");
        let mut counts = self.refs.lock();
        let count = counts[idx];
        match count {
            0 => crate::fatal!("kincref: {} is free", pa),
            u32::MAX => crate::fatal!("kincref: refcount overflow on {}", pa),
            n => counts[idx] = n + 1,
        }
    }

    /// Gives the caller a page it owns exclusively with the contents of `pa`.
    ///
    /// A page with a single reference is returned as is. A shared page is
    /// copied into a fresh page and the caller's reference to `pa` dropped.
    pub fn duplicate(&self, pa: PhysAddr) -> PageResult<PhysAddr> {
        let idx = self.page_index(pa, "knpage");
        match self.refs.get(idx) {
            0 => crate::fatal!("knpage: {} is free", pa),
            1 => return Ok(pa),
            _ => {}
        }

        let fresh = self.allocate()?;
        let fresh_idx = self.page_index(fresh, "knpage");
        {
            let src = self.mem.frame(idx).read();
            let mut dst = self.mem.frame(fresh_idx).write();
            dst.copy_from_slice(&src[..]);
        }

        let mut counts = self.refs.lock();
        let count = counts[idx];
        match count {
            0 => crate::fatal!("knpage: {} freed while shared", pa),
            1 => {
                // the other owners let go meanwhile
                drop(counts);
                self.free(fresh);
                debug!("knpage: {} became exclusive, copy dropped", pa);
                Ok(pa)
            }
            n => {
                counts[idx] = n - 1;
                drop(counts);
                self.counters.copies.fetch_add(1, Ordering::Relaxed);
                trace!("knpage: copied {} to {}", pa, fresh);
                Ok(fresh)
            }
        }
    }

    /// Runs `f` over the bytes of the page at `pa`
    pub fn with_page<R>(&self, pa: PhysAddr, f: impl FnOnce(&PageBuf) -> R) -> R {
        let idx = self.page_index(pa, "with_page");
        let frame = self.mem.frame(idx).read();
        f(&frame)
    }

    /// Runs `f` over the writable bytes of the page at `pa`
    pub fn with_page_mut<R>(&self, pa: PhysAddr, f: impl FnOnce(&mut PageBuf) -> R) -> R {
        let idx = self.page_index(pa, "with_page_mut");
        let mut frame = self.mem.frame(idx).write();
        f(&mut frame)
    }

    fn pop(&self, cpu: CpuId) -> Option<usize> {
        self.cpus[cpu].free.lock().pop(&self.links)
    }

    /// Moves up to `steal_batch` pages from other cores onto `cpu`'s list.
    ///
    /// Each victim is drained in one locked session into a detached list,
    /// which is spliced in afterwards. Returns the pages moved.
    fn steal(&self, cpu: CpuId) -> usize {
        let ncpu = self.cpus.len();
        let mut batch = FreeList::new();
        for off in 1..ncpu {
            let victim = (cpu + off) % ncpu;
            let mut list = self.cpus[victim].free.lock();
            while batch.len() < self.steal_batch {
                match list.pop(&self.links) {
                    Some(idx) => batch.push(&self.links, idx),
                    None => break,
                }
            }
            drop(list);
            if batch.len() >= self.steal_batch {
                break;
            }
        }

        let n = batch.len();
        if n > 0 {
            self.cpus[cpu].free.lock().append(&self.links, batch);
            self.counters.steals.fetch_add(1, Ordering::Relaxed);
            self.counters.stolen.fetch_add(n as u64, Ordering::Relaxed);
            debug!("kalloc: cpu {} stole {} pages", cpu, n);
        }
        n
    }

    /// Junk-fills a page and pushes it onto `cpu`'s list
    fn release_page(&self, cpu: CpuId, idx: usize) {
        self.mem.frame(idx).write().fill(FREE_FILL);
        self.cpus[cpu].free.lock().push(&self.links, idx);
    }

    fn current_cpu(&self) -> CpuId {
        let cpu = self.accessor.current_cpu();
        self.check_cpu(cpu, "mycpu");
        cpu
    }

    fn check_cpu(&self, cpu: CpuId, op: &str) {
        if cpu >= self.cpus.len() {
            crate::fatal!("{}: cpu {} out of range ({} cpus)", op, cpu, self.cpus.len());
        }
    }

    /// Frame index of a managed page; halts on a foreign address
    fn page_index(&self, pa: PhysAddr, op: &str) -> usize {
        let managed = self.managed.get();
        match (self.mem.index_of(pa), managed) {
            (Some(idx), Some(range)) if range.contains(&idx) => idx,
            _ => crate::fatal!("{}: bad address {}", op, pa),
        }
    }

    #[inline]
    pub fn ncpu(&self) -> usize {
        self.cpus.len()
    }

    /// Pages managed since `init`
    pub fn total_pages(&self) -> usize {
        self.managed.get().map_or(0, |r| r.len())
    }

    /// Pages currently on any free list
    pub fn free_pages(&self) -> usize {
        self.cpus.iter().map(|c| c.free.lock().len()).sum()
    }

    pub fn free_pages_on(&self, cpu: CpuId) -> usize {
        self.check_cpu(cpu, "free_pages_on");
        self.cpus[cpu].free.lock().len()
    }

    /// References to the page at `pa`
    pub fn refcount(&self, pa: PhysAddr) -> u32 {
        self.refs.get(self.page_index(pa, "refcount"))
    }

    /// Managed `[low, high)` address range, once initialised
    pub fn managed_range(&self) -> Option<(PhysAddr, PhysAddr)> {
        self.managed
            .get()
            .map(|r| (self.mem.addr_of(r.start), self.mem.addr_of(r.end)))
    }

    pub fn stats(&self) -> AllocStats {
        let c = &self.counters;
        AllocStats {
            allocations: c.allocations.load(Ordering::Relaxed),
            frees: c.frees.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            steals: c.steals.load(Ordering::Relaxed),
            stolen: c.stolen.load(Ordering::Relaxed),
            copies: c.copies.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
