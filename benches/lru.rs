use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::num::NonZeroUsize;

use nfstore::cache::{CacheKey, CacheRegistry, RangeCache};

const STORE_SIZE: u64 = 1 << 20;
const MAX_IO_LEN: u64 = 4096;

fn gen_keys(n: usize, distinct: u64, seed: u64) -> Vec<CacheKey> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            // a small key space produces repeats, so lookups actually hit
            let slot = rng.gen_range(0..distinct);
            CacheKey::new((slot * 4099) % (STORE_SIZE - MAX_IO_LEN), 1 + slot % MAX_IO_LEN)
        })
        .collect()
}

fn bench_range_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_cache");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);
    let cap = NonZeroUsize::new(128).unwrap_or(NonZeroUsize::MIN);
    let n = 10_000usize;

    for &distinct in &[64u64, 256, 4096] {
        let keys = gen_keys(n, distinct, 0xC0FFEE ^ distinct);
        group.throughput(Throughput::Elements(n as u64));

        // read-through: get, fill on miss
        group.bench_with_input(BenchmarkId::new("read_through", distinct), &keys, |b, keys| {
            b.iter(|| {
                let cache = RangeCache::new("bench", cap);
                let mut hits = 0u64;
                for k in keys {
                    match cache.get(k) {
                        Some(v) => hits += v.len() as u64,
                        None => cache.put(*k, vec![0u8; 64]),
                    }
                }
                criterion::black_box(hits);
            });
        });

        // 80/20 read/write mix with a clear on every write
        group.bench_with_input(BenchmarkId::new("mixed_with_clears", distinct), &keys, |b, keys| {
            let mut rng = StdRng::seed_from_u64(0xFACE_FEED);
            let writes: Vec<bool> = (0..keys.len()).map(|_| rng.gen_bool(0.2)).collect();
            b.iter(|| {
                let cache = RangeCache::new("bench", cap);
                for (k, &is_write) in keys.iter().zip(&writes) {
                    if is_write {
                        cache.clear();
                    } else if cache.get(k).is_none() {
                        let generation = cache.generation();
                        cache.put_if_current(*k, vec![0u8; 64], generation);
                    }
                }
                criterion::black_box(cache.stats());
            });
        });
    }
    group.finish();
}

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_registry");
    group.sample_size(20);
    let names: Vec<String> = (0..256).map(|i| format!("file-{}", i)).collect();
    let registry = CacheRegistry::new(128).unwrap();
    for n in &names {
        registry.get_or_create(n);
    }
    group.throughput(Throughput::Elements(names.len() as u64));
    group.bench_function("get_or_create_existing", |b| {
        b.iter(|| {
            for n in &names {
                criterion::black_box(registry.get_or_create(n));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_range_cache, bench_registry);
criterion_main!(benches);
