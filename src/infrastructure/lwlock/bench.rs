use criterion::{Criterion, criterion_group, criterion_main};
use std::sync::Arc;
use std::thread;

// Reference the main crate
extern crate kmem;

// Import the lock types from the main crate
use kmem::infrastructure::lwlock::{LockInterface, ParkingLotMutexWrapper, SleepLock, SpinLock};

// Test configuration
const THREADS: usize = 8;
const OPERATIONS_PER_THREAD: usize = 10_000;

// Generic lock benchmark: every thread does short read-modify-write sections
fn bench_lock_scenario<L>(b: &mut criterion::Bencher, threads: usize)
where
    L: LockInterface<usize> + Send + Sync + 'static,
{
    b.iter(|| {
        let lock = Arc::new(L::new(0));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..OPERATIONS_PER_THREAD {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), threads * OPERATIONS_PER_THREAD);
    });
}

// Benchmark contended short sections (bucket chains, free lists)
pub fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("Contended");

    group.bench_function("SpinLock", |b| {
        bench_lock_scenario::<SpinLock<usize>>(b, THREADS)
    });
    group.bench_function("SleepLock", |b| {
        bench_lock_scenario::<SleepLock<usize>>(b, THREADS)
    });
    group.bench_function("ParkingLotMutex", |b| {
        bench_lock_scenario::<ParkingLotMutexWrapper<usize>>(b, THREADS)
    });

    group.finish();
}

// Benchmark the uncontended fast path
pub fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("Uncontended");

    group.bench_function("SpinLock", |b| {
        bench_lock_scenario::<SpinLock<usize>>(b, 1)
    });
    group.bench_function("SleepLock", |b| {
        bench_lock_scenario::<SleepLock<usize>>(b, 1)
    });
    group.bench_function("ParkingLotMutex", |b| {
        bench_lock_scenario::<ParkingLotMutexWrapper<usize>>(b, 1)
    });

    group.finish();
}

// Export the benchmark group for criterion
criterion_group!(benches, bench_contended, bench_uncontended);

// Only run the benchmark group when this file is executed directly
criterion_main!(benches);
