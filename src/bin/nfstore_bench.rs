//!
//! nfstore_bench: load generator
//! -----------------------------
//! Opens N concurrent sessions against a running server and issues a mixed
//! READ/WRITE workload with random offsets and lengths inside a preallocated
//! backing file. Prints per-worker and aggregate throughput and latency.
//!

use std::env;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};

use nfstore::client::Client;
use nfstore::correlation::CorrelationId;
use nfstore::storage::DEFAULT_FILE;

const STORE_SIZE: u64 = 1 << 20;
const MAX_IO_LEN: u64 = 4096;

struct Options {
    addr: String,
    workers: usize,
    total_ops: usize,
    read_ratio: f64,
    file: String,
    seed: u64,
}

#[derive(Debug, Default, Clone)]
struct WorkerStats {
    ops: u64,
    reads: u64,
    writes: u64,
    errors: u64,
    total_us: f64,
}

impl WorkerStats {
    fn avg_us(&self) -> f64 {
        if self.ops == 0 { 0.0 } else { self.total_us / self.ops as f64 }
    }
}

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--addr HOST:PORT] [--workers N] [--ops N] [--read-ratio R] [--file NAME] [--seed N]\n\nOptions:\n  --addr HOST:PORT   Server address (default: 127.0.0.1:9090)\n  --workers N        Concurrent sessions (default: 8)\n  --ops N            Total operations across all workers (default: 10000)\n  --read-ratio R     Fraction of READs, 0.0..=1.0 (default: 0.8)\n  --file NAME        File to exercise (default: the session placeholder)\n  --seed N           RNG seed (default: 0xC0FFEE)\n"
    );
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut opts = Options {
        addr: "127.0.0.1:9090".to_string(),
        workers: 8,
        total_ops: 10_000,
        read_ratio: 0.8,
        file: DEFAULT_FILE.to_string(),
        seed: 0xC0FFEE,
    };
    let mut i = 1usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = || args.get(i + 1).cloned().ok_or_else(|| anyhow!("{} needs a value", flag));
        match flag {
            "--addr" => { opts.addr = value()?; i += 1; }
            "--workers" => { opts.workers = value()?.parse().context("--workers")?; i += 1; }
            "--ops" => { opts.total_ops = value()?.parse().context("--ops")?; i += 1; }
            "--read-ratio" => { opts.read_ratio = value()?.parse().context("--read-ratio")?; i += 1; }
            "--file" => { opts.file = value()?; i += 1; }
            "--seed" => { opts.seed = value()?.parse().context("--seed")?; i += 1; }
            other => bail!("unknown argument: {}", other),
        }
        i += 1;
    }
    if opts.workers == 0 { bail!("--workers must be at least 1"); }
    if !(0.0..=1.0).contains(&opts.read_ratio) { bail!("--read-ratio must be within 0.0..=1.0"); }
    Ok(opts)
}

/// Grow the target file to `STORE_SIZE` so random offsets always hit data.
async fn prepare(opts: &Options) -> Result<()> {
    let mut client = Client::connect(opts.addr.as_str(), None).await?;
    if opts.file != DEFAULT_FILE && !client.open(&opts.file).await? {
        bail!("server refused OPEN {}", opts.file);
    }
    let size = client.stat(&opts.file).await?.unwrap_or(0);
    if size < STORE_SIZE {
        let fill = vec![0u8; (STORE_SIZE - size) as usize];
        client.write(size, &fill).await?
            .ok_or_else(|| anyhow!("server refused preallocation write"))?;
    }
    Ok(())
}

async fn worker(id: usize, ops: usize, opts: &Options) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let trace = CorrelationId::new();
    let mut client = match Client::connect(opts.addr.as_str(), Some(&trace)).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[worker {}] connect failed: {:#}", id, e);
            stats.errors = ops as u64;
            return stats;
        }
    };
    if opts.file != DEFAULT_FILE && !matches!(client.open(&opts.file).await, Ok(true)) {
        eprintln!("[worker {}] OPEN {} failed", id, opts.file);
        stats.errors = ops as u64;
        return stats;
    }

    let mut rng = StdRng::seed_from_u64(opts.seed ^ (id as u64).wrapping_mul(1_315_423_911));
    for _ in 0..ops {
        let len = rng.gen_range(1..=MAX_IO_LEN);
        let off = rng.gen_range(0..=STORE_SIZE - MAX_IO_LEN);
        let is_read = rng.gen_bool(opts.read_ratio);

        let started = Instant::now();
        let ok = if is_read {
            match client.read(off, len).await {
                Ok(Some(_)) => { stats.reads += 1; true }
                Ok(None) => false,
                Err(e) => { eprintln!("[worker {}] {:#}", id, e); stats.errors += 1; break; }
            }
        } else {
            let data: Vec<u8> = (0..len).map(|j| ((off + j + id as u64) & 0xFF) as u8).collect();
            match client.write(off, &data).await {
                Ok(Some(n)) if n == len => { stats.writes += 1; true }
                Ok(_) => false,
                Err(e) => { eprintln!("[worker {}] {:#}", id, e); stats.errors += 1; break; }
            }
        };
        if !ok {
            stats.errors += 1;
            continue;
        }
        stats.total_us += started.elapsed().as_secs_f64() * 1e6;
        stats.ops += 1;
    }
    stats
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("nfstore_bench");
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage(program);
        return Ok(());
    }
    let opts = match parse_args(&args) {
        Ok(o) => o,
        Err(e) => {
            print_usage(program);
            return Err(e);
        }
    };

    prepare(&opts).await.with_context(|| format!("Failed to prepare {} on {}", opts.file, opts.addr))?;

    let per_worker = opts.total_ops / opts.workers;
    let started = Instant::now();
    let mut handles = Vec::with_capacity(opts.workers);
    let opts = std::sync::Arc::new(opts);
    for id in 0..opts.workers {
        let opts = opts.clone();
        handles.push(tokio::spawn(async move { worker(id, per_worker, &opts).await }));
    }
    let mut stats = Vec::with_capacity(handles.len());
    for h in handles {
        stats.push(h.await.context("worker task panicked")?);
    }
    let elapsed = started.elapsed().as_secs_f64();

    println!("\n=== Per-worker stats ===");
    for (id, s) in stats.iter().enumerate() {
        println!(
            "Worker {}: ops={} (R={}, W={}, err={}), avg={:.0} us",
            id, s.ops, s.reads, s.writes, s.errors, s.avg_us()
        );
    }

    let total = stats.iter().fold(WorkerStats::default(), |mut acc, s| {
        acc.ops += s.ops;
        acc.reads += s.reads;
        acc.writes += s.writes;
        acc.errors += s.errors;
        acc.total_us += s.total_us;
        acc
    });
    let ops_sec = if elapsed > 0.0 { total.ops as f64 / elapsed } else { 0.0 };
    println!("\n=== Aggregate ===");
    println!("Total ops    : {} (reads={}, writes={})", total.ops, total.reads, total.writes);
    println!("Errors       : {}", total.errors);
    println!("Elapsed      : {:.3} s", elapsed);
    println!("Throughput   : {:.0} ops/s", ops_sec);
    println!("Avg latency  : {:.0} us", total.avg_us());
    Ok(())
}
