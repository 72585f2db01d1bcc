//! Which core is running the caller
//!
//! Per-core allocator state is an array indexed by `CpuId`. The id comes
//! from the scheduler through a `CpuAccessor`; hosted code maps OS threads
//! onto cores.

use crate::types::CpuId;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Scheduler-provided accessor for the current core
pub trait CpuAccessor: Send + Sync {
    /// Core the caller runs on; always below the configured core count
    fn current_cpu(&self) -> CpuId;
}

/// Every caller is on the same core
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedCpu(pub CpuId);

impl CpuAccessor for FixedCpu {
    #[inline]
    fn current_cpu(&self) -> CpuId {
        self.0
    }
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// (ThreadCpu instance, core) pairs this thread is bound to
    static BINDINGS: RefCell<Vec<(u64, CpuId)>> = const { RefCell::new(Vec::new()) };
}

/// Hosted stand-in for a scheduler: binds OS threads to cores.
///
/// Threads can be bound explicitly with [`ThreadCpu::bind`]; an unbound
/// thread is assigned the next core round-robin on first use. Bindings live
/// in the bound thread, so `current_cpu` takes no lock and a binding goes
/// away with its thread.
#[derive(Debug)]
pub struct ThreadCpu {
    id: u64,
    ncpu: usize,
    next: AtomicUsize,
}

impl ThreadCpu {
    pub fn new(ncpu: usize) -> Self {
        Self {
            id: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            ncpu: ncpu.max(1),
            next: AtomicUsize::new(0),
        }
    }

    /// Binds the calling thread to `cpu`
    pub fn bind(&self, cpu: CpuId) {
        if cpu >= self.ncpu {
            crate::fatal!("bind: cpu {} out of range ({} cpus)", cpu, self.ncpu);
        }
        self.store(cpu);
    }

    fn lookup(&self) -> Option<CpuId> {
        BINDINGS.with(|b| {
            b.borrow()
                .iter()
                .find(|&&(id, _)| id == self.id)
                .map(|&(_, cpu)| cpu)
        })
    }

    fn store(&self, cpu: CpuId) {
        BINDINGS.with(|b| {
            let mut b = b.borrow_mut();
            match b.iter_mut().find(|(id, _)| *id == self.id) {
                Some(slot) => slot.1 = cpu,
                None => b.push((self.id, cpu)),
            }
        });
    }
}

impl Drop for ThreadCpu {
    fn drop(&mut self) {
        // only the dropping thread's entry can be reached
        let _ = BINDINGS.try_with(|b| b.borrow_mut().retain(|&(id, _)| id != self.id));
    }
}

impl CpuAccessor for ThreadCpu {
    fn current_cpu(&self) -> CpuId {
        if let Some(cpu) = self.lookup() {
            return cpu;
        }
        let cpu = self.next.fetch_add(1, Ordering::Relaxed) % self.ncpu;
        self.store(cpu);
        cpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fixed_cpu() {
        assert_eq!(FixedCpu(3).current_cpu(), 3);
    }

    #[test]
    fn test_thread_cpu_binding_is_sticky() {
        let cpus = ThreadCpu::new(4);
        cpus.bind(2);
        assert_eq!(cpus.current_cpu(), 2);
        assert_eq!(cpus.current_cpu(), 2);
    }

    #[test]
    fn test_thread_cpu_round_robin() {
        let cpus = ThreadCpu::new(2);
        let ids: Vec<CpuId> = thread::scope(|s| {
            let handles: Vec<_> = (0..4).map(|_| s.spawn(|| cpus.current_cpu())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(ids.iter().all(|&c| c < 2));
        assert_eq!(ids.iter().filter(|&&c| c == 0).count(), 2);
    }

    #[test]
    fn test_thread_cpu_instances_bind_independently() {
        let a = ThreadCpu::new(4);
        let b = ThreadCpu::new(4);
        a.bind(3);
        // b has never seen this thread, so it starts its own round-robin
        assert_eq!(b.current_cpu(), 0);
        assert_eq!(a.current_cpu(), 3);
        b.bind(1);
        assert_eq!(a.current_cpu(), 3);
        assert_eq!(b.current_cpu(), 1);
    }

    #[test]
    fn test_thread_cpu_rebind_overrides_assignment() {
        let cpus = ThreadCpu::new(4);
        assert_eq!(cpus.current_cpu(), 0);
        cpus.bind(2);
        assert_eq!(cpus.current_cpu(), 2);
        // the explicit binding did not consume a round-robin slot
        let other = thread::scope(|s| s.spawn(|| cpus.current_cpu()).join().unwrap());
        assert_eq!(other, 1);
    }

    #[test]
    fn test_thread_cpu_binding_ends_with_its_thread() {
        let cpus = ThreadCpu::new(2);
        thread::scope(|s| {
            s.spawn(|| cpus.bind(1)).join().unwrap();
        });
        // a fresh thread is unbound again
        let cpu = thread::scope(|s| s.spawn(|| cpus.current_cpu()).join().unwrap());
        assert_eq!(cpu, 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_bind_out_of_range() {
        ThreadCpu::new(2).bind(5);
    }
}
