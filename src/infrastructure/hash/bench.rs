use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::Rng;

// Reference the main crate
extern crate kmem;

use kmem::infrastructure::hash::BucketHash;
use kmem::types::NBUCKET;

// Random (dev, blockno) keys resembling a small file system
fn generate_keys(count: usize) -> Vec<(u32, u32)> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| (rng.gen_range(0..2), rng.gen_range(0..2000)))
        .collect()
}

// Benchmark the cost of mapping a key to a bucket
pub fn bench_bucket_lookup(c: &mut Criterion) {
    let keys = generate_keys(1024);

    let mut group = c.benchmark_group("BucketLookup");
    for hash in [BucketHash::Xv6, BucketHash::Fnv1a, BucketHash::Xxh64] {
        group.bench_function(format!("{:?}", hash), |b: &mut criterion::Bencher| {
            b.iter(|| {
                let mut acc = 0usize;
                for &(dev, blockno) in &keys {
                    acc ^= hash.bucket(black_box(dev), black_box(blockno), NBUCKET);
                }
                acc
            })
        });
    }
    group.finish();
}

// Report how evenly each hash spreads a sequential block range
pub fn bench_sequential_spread(c: &mut Criterion) {
    let mut group = c.benchmark_group("SequentialSpread");
    for hash in [BucketHash::Xv6, BucketHash::Fnv1a, BucketHash::Xxh64] {
        group.bench_function(format!("{:?}", hash), |b: &mut criterion::Bencher| {
            b.iter(|| {
                let mut counts = [0u32; NBUCKET];
                for blockno in 0..4096u32 {
                    counts[hash.bucket(1, black_box(blockno), NBUCKET)] += 1;
                }
                counts.iter().max().copied().unwrap_or(0) - counts.iter().min().copied().unwrap_or(0)
            })
        });
    }
    group.finish();
}

// Export the benchmark group for criterion
criterion_group!(benches, bench_bucket_lookup, bench_sequential_spread);

// Only run the benchmark group when this file is executed directly
criterion_main!(benches);
