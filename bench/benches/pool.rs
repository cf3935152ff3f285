//! Tenant microbenchmarks using Criterion.
//!
//! - Identifier allocation, reuse and free
//! - Registration and iteration
//! - Concurrent allocation on one tenant
//! - Seeded churn over a fragmented chain

use std::{hint::black_box, sync::Arc, thread};

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rusty_pool::pool::{ChunkedPool, IdSchema, Tenant};
use rusty_pool_bench::{
    churn::{Churn, ChurnConfig},
    items::BenchItem,
    memory::measure_memory,
};

#[cfg(feature = "memory_profiling")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

const SIZES: [u32; 3] = [1_000, 100_000, 1_000_000];

fn tenant() -> Arc<Tenant<BenchItem>> {
    ChunkedPool::new(IdSchema::default())
        .new_tenant()
        .expect("open pool")
}

fn filled(size: u32) -> (Arc<Tenant<BenchItem>>, Vec<u32>) {
    let tenant = tenant();
    let ids = (0..size)
        .map(|v| {
            tenant
                .register(Arc::new(BenchItem::new(u64::from(v))), None)
                .expect("open tenant")
        })
        .collect();
    (tenant, ids)
}

// =============================================================================
// Allocation Benchmarks
// =============================================================================

fn bench_next_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("tenant_next_id");

    for size in SIZES {
        group.throughput(Throughput::Elements(u64::from(size)));

        group.bench_with_input(BenchmarkId::new("new", size), &size, |b, &n| {
            b.iter_batched(
                tenant,
                |tenant| {
                    for _ in 0..n {
                        black_box(tenant.next_id().expect("open tenant"));
                    }
                    tenant
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("reuse", size), &size, |b, &n| {
            b.iter_batched(
                || {
                    let (tenant, ids) = filled(n);
                    for id in ids {
                        tenant.free_id(id).expect("live id");
                    }
                    tenant
                },
                |tenant| {
                    for _ in 0..n {
                        black_box(tenant.next_id().expect("open tenant"));
                    }
                    tenant
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("free", size), &size, |b, &n| {
            b.iter_batched(
                || filled(n),
                |(tenant, ids)| {
                    for id in ids {
                        black_box(tenant.free_id(id).expect("live id"));
                    }
                    tenant
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

// =============================================================================
// Registration and Iteration Benchmarks
// =============================================================================

fn bench_register_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("tenant_items");

    for size in SIZES {
        group.throughput(Throughput::Elements(u64::from(size)));

        group.bench_with_input(BenchmarkId::new("register", size), &size, |b, &n| {
            b.iter_batched(
                || {
                    let items: Vec<_> = (0..n).map(|v| Arc::new(BenchItem::new(u64::from(v)))).collect();
                    (tenant(), items)
                },
                |(tenant, items)| {
                    for item in items {
                        black_box(tenant.register(item, None).expect("open tenant"));
                    }
                    tenant
                },
                BatchSize::LargeInput,
            );
        });

        let (tenant, _) = filled(size);
        group.bench_with_input(BenchmarkId::new("iterate", size), &tenant, |b, tenant| {
            b.iter(|| black_box(tenant.iter().map(|item| **item).sum::<u64>()));
        });
        group.bench_with_input(BenchmarkId::new("positions", size), &tenant, |b, tenant| {
            b.iter(|| black_box(tenant.positions().count()));
        });
    }

    group.finish();
}

// =============================================================================
// Concurrency Benchmarks
// =============================================================================

fn bench_concurrent_next_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("tenant_concurrent");
    let per_thread = 100_000u32;

    for threads in [2, 4, 8] {
        group.throughput(Throughput::Elements(u64::from(per_thread) * threads as u64));

        group.bench_with_input(BenchmarkId::new("next_id", threads), &threads, |b, &threads| {
            b.iter_batched(
                tenant,
                |tenant| {
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let tenant = Arc::clone(&tenant);
                            thread::spawn(move || {
                                for _ in 0..per_thread {
                                    black_box(tenant.next_id().expect("open tenant"));
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().expect("allocating thread");
                    }
                    tenant
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

// =============================================================================
// Churn Benchmarks
// =============================================================================

fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("tenant_churn");

    let mut churn = Churn::new(ChurnConfig::default()).expect("valid churn config");
    group.bench_function("round", |b| {
        b.iter(|| churn.round().expect("open tenant"));
    });
    group.bench_function("iterate_fragmented", |b| {
        b.iter(|| black_box(churn.iterate()));
    });

    group.finish();

    let live = ChurnConfig::default().live_items;
    let (_, stats) = measure_memory(|| Churn::new(ChurnConfig::default()).expect("valid churn config"));
    if stats.peak_bytes > 0 {
        println!(
            "churn setup: {stats}, {:.1} peak bytes/item",
            stats.peak_bytes_per_item(live)
        );
    }
}

criterion_group!(
    benches,
    bench_next_id,
    bench_register_iterate,
    bench_concurrent_next_id,
    bench_churn
);
criterion_main!(benches);
