//! Basic benchmarks for the `guarded_pool` crate.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use guarded_pool::{GuardedPool, HeaderMode};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const OBJECT_SIZE: usize = 64;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("gp_cycle");

    group.bench_function("trusting", |b| {
        let mut pool = GuardedPool::builder()
            .object_size(OBJECT_SIZE)
            .objects_per_page(128)
            .max_pages(0)
            .build()
            .unwrap();

        b.iter(|| {
            let block = pool.allocate().unwrap();
            // SAFETY: the block was just handed out by this pool.
            unsafe { pool.free(black_box(block.as_ptr())).unwrap() };
        });
    });

    group.bench_function("debug_checks", |b| {
        let mut pool = GuardedPool::builder()
            .object_size(OBJECT_SIZE)
            .objects_per_page(128)
            .max_pages(0)
            .debug(true)
            .pad_bytes(8)
            .header(HeaderMode::Basic)
            .build()
            .unwrap();

        b.iter(|| {
            let block = pool.allocate().unwrap();
            // SAFETY: the block was just handed out by this pool.
            unsafe { pool.free(black_box(block.as_ptr())).unwrap() };
        });
    });

    group.finish();

    let mut group = c.benchmark_group("gp_pages");

    group.bench_function("fill_and_reclaim", |b| {
        let mut pool = GuardedPool::builder()
            .object_size(OBJECT_SIZE)
            .objects_per_page(32)
            .max_pages(0)
            .header(HeaderMode::Basic)
            .build()
            .unwrap();

        b.iter(|| {
            let blocks: Vec<_> = (0..256).map(|_| pool.allocate().unwrap()).collect();
            for block in blocks {
                // SAFETY: every block was just handed out by this pool.
                unsafe { pool.free(block.as_ptr()).unwrap() };
            }
            black_box(pool.free_empty_pages());
        });
    });

    group.finish();
}
