//! Basic benchmarks for the `fixed_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use fixed_pool::FixedPool;
use new_zealand::nz;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("fixed_basic");

    let allocs_op = allocs.operation("build_1000");
    group.bench_function("build_1000", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(FixedPool::<TestItem>::new(nz!(1000))));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("checked_allocate_release");
    group.bench_function("checked_allocate_release", |b| {
        b.iter_custom(|iters| {
            let pool = FixedPool::<TestItem>::new(nz!(1000));

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(pool.allocate_checked(black_box(TEST_VALUE))));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("unchecked_allocate_deallocate");
    group.bench_function("unchecked_allocate_deallocate", |b| {
        b.iter_custom(|iters| {
            let pool = FixedPool::<TestItem>::new(nz!(1000));

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let ptr = pool.allocate_unchecked(black_box(TEST_VALUE));

                // SAFETY: The pointer came from this pool and is not used after this.
                unsafe {
                    pool.deallocate_unchecked(black_box(ptr));
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_when_half_full");
    group.bench_function("allocate_when_half_full", |b| {
        b.iter_custom(|iters| {
            let pool = FixedPool::<TestItem>::new(nz!(1000));

            // Every other slot is occupied, so each search has to skip over some of them.
            let held: Vec<_> = (0..1000)
                .filter_map(|_| pool.allocate_checked(TEST_VALUE))
                .collect::<Vec<_>>()
                .into_iter()
                .step_by(2)
                .collect();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(pool.allocate_checked(black_box(TEST_VALUE))));
            }

            let elapsed = start.elapsed();

            drop(held);

            elapsed
        });
    });

    let allocs_op = allocs.operation("allocate_when_full");
    group.bench_function("allocate_when_full", |b| {
        b.iter_custom(|iters| {
            let pool = FixedPool::<TestItem>::new(nz!(100));

            let held: Vec<_> = (0..100)
                .filter_map(|_| pool.allocate_checked(TEST_VALUE))
                .collect();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(pool.allocate_checked(black_box(TEST_VALUE))));
            }

            let elapsed = start.elapsed();

            drop(held);

            elapsed
        });
    });

    let allocs_op = allocs.operation("stats_1000");
    group.bench_function("stats_1000", |b| {
        b.iter_custom(|iters| {
            let pool = FixedPool::<TestItem>::new(nz!(1000));

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                black_box(pool.stats());
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
