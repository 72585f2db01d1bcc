//! Benchmark scenarios module

use kmem::infrastructure::cpu::ThreadCpu;
use kmem::{BufferCache, BufferError, PageAllocator, PageError, PhysAddr};
use rand::Rng;
use rand::rngs::StdRng;
use std::sync::Arc;

/// Device number every scenario reads from
pub const DEV: u32 = 1;

/// The subsystems under test, shared by all worker threads
pub struct Target {
    pub cache: BufferCache,
    pub kmem: PageAllocator,
    pub cpus: Arc<ThreadCpu>,
    /// Blocks on the device
    pub blocks: u32,
}

/// Why a scenario iteration did not complete
#[derive(Debug)]
pub enum OpError {
    Page(PageError),
    Block(BufferError),
}

impl From<PageError> for OpError {
    fn from(e: PageError) -> Self {
        OpError::Page(e)
    }
}

impl From<BufferError> for OpError {
    fn from(e: BufferError) -> Self {
        OpError::Block(e)
    }
}

/// Per-thread scenario state
pub struct Worker {
    pub cpu: usize,
    pub held: Vec<PhysAddr>,
}

impl Worker {
    pub fn new(cpu: usize) -> Self {
        Self {
            cpu,
            held: Vec::new(),
        }
    }
}

/// Scenario trait - defines a benchmark scenario
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// Execute one iteration of the scenario
    fn execute(
        &self,
        target: &Target,
        worker: &mut Worker,
        rng: &mut StdRng,
    ) -> Result<(), OpError>;

    /// Give back whatever the worker still holds
    fn finish(&self, target: &Target, worker: &mut Worker) {
        for pa in worker.held.drain(..) {
            target.kmem.free_on(worker.cpu, pa);
        }
    }
}

/// Repeated reads of a working set that fits in the cache
pub struct BcacheHot {
    hot: u32,
}

impl BcacheHot {
    pub fn new(nbuf: usize) -> Self {
        Self {
            hot: (nbuf as u32 / 2).max(1),
        }
    }
}

impl Scenario for BcacheHot {
    fn name(&self) -> &str {
        "bcache_hot"
    }

    fn execute(
        &self,
        target: &Target,
        _worker: &mut Worker,
        rng: &mut StdRng,
    ) -> Result<(), OpError> {
        let b = target.cache.read(DEV, rng.gen_range(0..self.hot))?;
        target.cache.release(b);
        Ok(())
    }
}

/// Uniform reads over the whole device with some write-through
pub struct BcacheEvict;

impl Scenario for BcacheEvict {
    fn name(&self) -> &str {
        "bcache_evict"
    }

    fn execute(
        &self,
        target: &Target,
        _worker: &mut Worker,
        rng: &mut StdRng,
    ) -> Result<(), OpError> {
        let mut b = target.cache.read(DEV, rng.gen_range(0..target.blocks))?;
        if rng.gen_ratio(1, 10) {
            b[0] = b[0].wrapping_add(1);
            target.cache.write(&b)?;
        }
        target.cache.release(b);
        Ok(())
    }
}

/// Allocate and free on the same core
pub struct KallocLocal;

impl Scenario for KallocLocal {
    fn name(&self) -> &str {
        "kalloc_local"
    }

    fn execute(
        &self,
        target: &Target,
        worker: &mut Worker,
        _rng: &mut StdRng,
    ) -> Result<(), OpError> {
        let pa = target.kmem.allocate_on(worker.cpu)?;
        target.kmem.free_on(worker.cpu, pa);
        Ok(())
    }
}

/// Allocate locally, free onto the next core, so every list keeps running
/// dry and refilling by stealing
pub struct KallocSteal;

impl Scenario for KallocSteal {
    fn name(&self) -> &str {
        "kalloc_steal"
    }

    fn execute(
        &self,
        target: &Target,
        worker: &mut Worker,
        _rng: &mut StdRng,
    ) -> Result<(), OpError> {
        // fails with OutOfMemory while every page is in flight on other cores
        let pa = target.kmem.allocate_on(worker.cpu)?;
        let next = (worker.cpu + 1) % target.kmem.ncpu();
        target.kmem.free_on(next, pa);
        Ok(())
    }
}

/// Fork-style sharing: share a page, then break the sharing by copying
pub struct CowFork;

impl Scenario for CowFork {
    fn name(&self) -> &str {
        "cow_fork"
    }

    fn execute(
        &self,
        target: &Target,
        worker: &mut Worker,
        rng: &mut StdRng,
    ) -> Result<(), OpError> {
        let kmem = &target.kmem;
        if worker.held.len() < 16 {
            let pa = kmem.allocate_on(worker.cpu)?;
            kmem.with_page_mut(pa, |page| page[0] = worker.cpu as u8);
            worker.held.push(pa);
        }

        let pa = worker.held[rng.gen_range(0..worker.held.len())];
        kmem.add_ref(pa);
        match kmem.duplicate(pa) {
            Ok(copy) if copy != pa => kmem.free_on(worker.cpu, copy),
            Ok(_) => {}
            Err(e) => {
                kmem.free_on(worker.cpu, pa);
                return Err(e.into());
            }
        }
        Ok(())
    }
}

/// Looks a scenario up by name
pub fn by_name(name: &str, nbuf: usize) -> Option<Box<dyn Scenario>> {
    let scenario: Box<dyn Scenario> = match name {
        "bcache_hot" => Box::new(BcacheHot::new(nbuf)),
        "bcache_evict" => Box::new(BcacheEvict),
        "kalloc_local" => Box::new(KallocLocal),
        "kalloc_steal" => Box::new(KallocSteal),
        "cow_fork" => Box::new(CowFork),
        _ => return None,
    };
    Some(scenario)
}
