//! kmem Benchmark Tool

use clap::Parser;
use kmem::infrastructure::clock::WallTicks;
use kmem::infrastructure::cpu::ThreadCpu;
use kmem::infrastructure::hash::BucketHash;
use kmem::{AllocConfig, BufferCache, CacheConfig, MemDisk, PageAllocator};
use rand::SeedableRng;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

mod metrics;
mod scenarios;

use metrics::Metrics;
use scenarios::{Scenario, Target, Worker};

#[derive(Parser, Debug, Clone)]
#[command(name = "kmem-bench")]
#[command(about = "Buffer cache and page allocator benchmark tool")]
struct Args {
    #[arg(short = 't', long, default_value = "4")]
    threads: usize,

    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,

    /// bcache_hot, bcache_evict, kalloc_local, kalloc_steal or cow_fork
    #[arg(short = 's', long, default_value = "bcache_evict")]
    scenario: String,

    #[arg(long, default_value = "30")]
    nbuf: usize,

    #[arg(long, default_value = "13")]
    nbucket: usize,

    /// xv6, fnv1a or xxh64
    #[arg(long, default_value = "xv6")]
    hash: String,

    /// Blocks on the simulated device
    #[arg(long, default_value = "1000")]
    blocks: u32,

    /// Pages of simulated physical memory
    #[arg(long, default_value = "4096")]
    pages: usize,

    /// Simulated device read latency in microseconds
    #[arg(long, default_value = "0")]
    latency_us: u64,

    #[arg(short = 'w', long, default_value = "0")]
    warmup: u64,

    #[arg(long, default_value = "0")]
    seed: u64,
}

fn parse_hash(name: &str) -> Option<BucketHash> {
    match name {
        "xv6" => Some(BucketHash::Xv6),
        "fnv1a" => Some(BucketHash::Fnv1a),
        "xxh64" => Some(BucketHash::Xxh64),
        _ => None,
    }
}

fn build_target(args: &Args) -> Result<Target, Box<dyn Error>> {
    let hash = parse_hash(&args.hash).ok_or_else(|| format!("unknown hash: {}", args.hash))?;
    let cache_config = CacheConfig {
        nbuf: args.nbuf,
        nbucket: args.nbucket,
        hash,
    };
    let disk = MemDisk::with_latency(args.blocks, Duration::from_micros(args.latency_us));
    let cache = BufferCache::new(&cache_config, Arc::new(disk), Arc::new(WallTicks::default()))?;

    let alloc_config = AllocConfig {
        ncpu: args.threads,
        phys_pages: args.pages,
        ..AllocConfig::default()
    };
    let cpus = Arc::new(ThreadCpu::new(args.threads));
    let kmem = PageAllocator::new(&alloc_config, cpus.clone())?;
    kmem.init_all();

    Ok(Target {
        cache,
        kmem,
        cpus,
        blocks: args.blocks,
    })
}

fn run_thread(
    thread_id: usize,
    scenario: &dyn Scenario,
    target: &Target,
    stop_flag: &AtomicBool,
    metrics: &Metrics,
    seed: u64,
) {
    target.cpus.bind(thread_id);
    let seed = seed.wrapping_add(thread_id as u64 * 0x9e3779b97f4a7c15);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut worker = Worker::new(thread_id);

    while !stop_flag.load(Ordering::Relaxed) {
        let start = Instant::now();
        let res = scenario.execute(target, &mut worker, &mut rng);
        let elapsed = start.elapsed().as_nanos() as u64;
        match res {
            Ok(()) => metrics.record_completed(elapsed),
            Err(e) => metrics.record_failure(&e),
        }
    }
    scenario.finish(target, &mut worker);
}

fn main() {
    let args = Args::parse();
    if args.threads == 0 {
        eprintln!("--threads must be positive");
        std::process::exit(1);
    }

    println!("kmem Benchmark Tool");
    println!("===================");
    println!("Started: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("Scenario: {}", args.scenario);
    println!("Threads: {}", args.threads);
    println!("Duration: {}s", args.duration);
    println!("Buffers: {} in {} buckets ({} hash)", args.nbuf, args.nbucket, args.hash);
    println!("Pages: {}", args.pages);
    println!();

    let Some(scenario) = scenarios::by_name(&args.scenario, args.nbuf) else {
        eprintln!("Unknown scenario: {}", args.scenario);
        std::process::exit(1);
    };

    println!("Initializing...");
    let target = match build_target(&args) {
        Ok(target) => target,
        Err(e) => {
            eprintln!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };
    println!("Initialization complete.");

    if args.warmup > 0 {
        println!("Warming up for {}s...", args.warmup);
        std::thread::sleep(Duration::from_secs(args.warmup));
    }

    let stop_flag = AtomicBool::new(false);
    let metrics = Metrics::new();
    let duration = Duration::from_secs(args.duration);

    println!("Running benchmark...");
    let start_time = Instant::now();

    std::thread::scope(|s| {
        for i in 0..args.threads {
            let (scenario, target, stop, metrics) =
                (scenario.as_ref(), &target, &stop_flag, &metrics);
            let seed = args.seed;
            s.spawn(move || run_thread(i, scenario, target, stop, metrics, seed));
        }
        std::thread::sleep(duration);
        stop_flag.store(true, Ordering::Relaxed);
    });

    let elapsed = start_time.elapsed();

    let completed = metrics.completed();
    let ops_per_sec = completed as f64 / elapsed.as_secs_f64();
    let us = |ns: u64| ns as f64 / 1000.0;

    println!();
    println!("{} statistics:", scenario.name());
    println!("    completed:         {:>12} ({:.1} ops/s)", completed, ops_per_sec);
    println!(
        "    latency:           {:8.2} us (avg), {:8.2} us (p99), {:8.2} us (max)",
        us(metrics.avg_latency_ns()),
        us(metrics.percentile_ns(99.0)),
        us(metrics.max_latency_ns())
    );
    println!("    out of memory:     {:>12}", metrics.out_of_memory());
    println!("    device errors:     {:>12}", metrics.device_errors());
    if metrics.other_errors() > 0 {
        println!("    other errors:      {:>12}", metrics.other_errors());
    }

    let cs = target.cache.stats();
    println!("    buffer cache:");
    println!("        hits: {}, misses: {}, raced: {}", cs.hits, cs.misses, cs.raced);
    println!(
        "        evictions: {}, device reads: {}, device writes: {}",
        cs.evictions, cs.device_reads, cs.device_writes
    );

    let ps = target.kmem.stats();
    println!("    page allocator:");
    println!(
        "        allocations: {}, frees: {}, failed: {}",
        ps.allocations, ps.frees, ps.failed
    );
    println!(
        "        steals: {} ({} pages), copies: {}",
        ps.steals, ps.stolen, ps.copies
    );
    println!(
        "        free pages: {} / {}",
        target.kmem.free_pages(),
        target.kmem.total_pages()
    );
}
