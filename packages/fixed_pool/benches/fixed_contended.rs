//! Benchmarks for `fixed_pool` under contention, with several threads allocating from the same
//! pool at the same time.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use fixed_pool::FixedPool;
use new_zealand::nz;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = [u64; 4];
const TEST_VALUE: TestItem = [1, 2, 3, 4];

const THREAD_COUNTS: [usize; 3] = [2, 4, 8];

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("fixed_contended");

    for thread_count in THREAD_COUNTS {
        let name = format!("allocate_release_{thread_count}_threads");

        let allocs_op = allocs.operation(&name);
        group.bench_function(&name, |b| {
            b.iter_custom(|iters| {
                let pool = FixedPool::<TestItem>::new(nz!(64));

                let _span = allocs_op.measure_process().iterations(iters);

                run_on_threads(thread_count, || {
                    for _ in 0..iters {
                        drop(black_box(pool.allocate_checked(black_box(TEST_VALUE))));
                    }
                })
            });
        });

        let name = format!("exhausted_{thread_count}_threads");

        // Fewer slots than threads, so most attempts find the pool exhausted.
        let allocs_op = allocs.operation(&name);
        group.bench_function(&name, |b| {
            b.iter_custom(|iters| {
                let pool = FixedPool::<TestItem>::new(nz!(1));

                let _span = allocs_op.measure_process().iterations(iters);

                run_on_threads(thread_count, || {
                    for _ in 0..iters {
                        drop(black_box(pool.allocate_checked(black_box(TEST_VALUE))));
                    }
                })
            });
        });
    }

    group.finish();

    allocs.print_to_stdout();
}

/// Runs `work` on `thread_count` threads that all start at the same time and returns the mean
/// time each thread took.
fn run_on_threads(thread_count: usize, work: impl Fn() + Sync) -> Duration {
    let barrier = Barrier::new(thread_count);

    let total: Duration = thread::scope(|s| {
        let workers: Vec<_> = (0..thread_count)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();

                    let start = Instant::now();
                    work();
                    start.elapsed()
                })
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .sum()
    });

    total
        .checked_div(u32::try_from(thread_count).unwrap())
        .unwrap()
}
