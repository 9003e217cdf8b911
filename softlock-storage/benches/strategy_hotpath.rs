use criterion::{criterion_group, criterion_main, Criterion};
use softlock_core::{CacheKey, RegionId, StrategyConfig};
use softlock_storage::{CacheConcurrencyStrategy, InMemoryCacheBackend, ReadWriteStrategy};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type Strategy = ReadWriteStrategy<InMemoryCacheBackend<String, u64>, String, u64>;

fn bench_strategy(clustered: bool) -> (Strategy, Arc<InMemoryCacheBackend<String, u64>>) {
    let backend = if clustered {
        InMemoryCacheBackend::clustered(Duration::from_secs(60))
    } else {
        InMemoryCacheBackend::new(Duration::from_secs(60))
    };
    let backend = Arc::new(backend);
    let strategy = ReadWriteStrategy::new(
        Arc::clone(&backend),
        StrategyConfig::for_region("bench"),
    )
    .expect("build strategy");
    (strategy, backend)
}

fn bench_key() -> CacheKey {
    CacheKey::new(Uuid::now_v7(), RegionId(1), Uuid::now_v7())
}

fn bench_cached_read(c: &mut Criterion) {
    let (strategy, backend) = bench_strategy(false);
    let key = bench_key();
    strategy
        .after_insert(&key, "row".to_string(), Some(1))
        .expect("insert row");

    c.bench_function("strategy/get_hit", |b| {
        b.iter(|| {
            let tx = backend.clock().next();
            black_box(strategy.get(black_box(&key), tx).expect("get"));
        });
    });
}

fn bench_write_cycle(c: &mut Criterion) {
    for clustered in [false, true] {
        let (strategy, _backend) = bench_strategy(clustered);
        let key = bench_key();
        let name = if clustered {
            "strategy/lock_after_update_clustered"
        } else {
            "strategy/lock_after_update"
        };

        let mut version = 0u64;
        c.bench_function(name, |b| {
            b.iter(|| {
                let token = strategy.lock(&key, Some(version)).expect("lock");
                version += 1;
                black_box(
                    strategy
                        .after_update(&key, "row".to_string(), Some(version), &token)
                        .expect("after_update"),
                );
            });
        });
    }
}

criterion_group!(benches, bench_cached_read, bench_write_cycle);
criterion_main!(benches);
