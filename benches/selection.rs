use std::collections::HashMap;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use threshold_proxy_reencryption::{
    prefetch::PrefetchStrategy,
    registry::Address,
    reservoir::{MergedReservoir, ProxyReservoir},
};

fn weights(size: u64) -> HashMap<Address, u64> {
    (0..size)
        .map(|n| (Address::from_low_u64(n), 1 + (n * 37) % 1_000))
        .collect()
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservoir_drain");

    for size in [100, 1_000, 5_000] {
        let pool = weights(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &pool, |b, pool| {
            b.iter_batched(
                || ProxyReservoir::new(pool.clone(), StdRng::seed_from_u64(7)),
                |mut reservoir| reservoir.draw(size as usize),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_prefetch(c: &mut Criterion) {
    let pool = weights(1_000);
    c.bench_function("prefetch_first_batch_30", |b| {
        b.iter_batched(
            || {
                let reservoir = ProxyReservoir::new(pool.clone(), StdRng::seed_from_u64(7));
                let merged = MergedReservoir::from_parts(vec![], reservoir);
                PrefetchStrategy::new(merged, 30).unwrap()
            },
            |mut strategy| strategy.call(0),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_drain, bench_prefetch);
criterion_main!(benches);
