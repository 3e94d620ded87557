//! Multithreaded usage example for `FixedPool`.
//!
//! Several worker threads allocate from the same pool at the same time. Some of their attempts
//! find the pool exhausted, which is an expected outcome and not an error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use fixed_pool::{FixedPool, alloc_checked, global_pool, pool_stats};
use new_zealand::nz;

const THREAD_COUNT: usize = 8;
const ITERATIONS_PER_THREAD: usize = 10_000;

struct Job {
    worker: usize,
    sequence: usize,
}

global_pool!(Job, 16);

fn main() {
    tracing_subscriber::fmt().init();

    let pool = FixedPool::<[u8; 64]>::new(nz!(4));

    let succeeded = AtomicUsize::new(0);
    let exhausted = AtomicUsize::new(0);

    thread::scope(|s| {
        for worker in 0..THREAD_COUNT {
            let pool = &pool;
            let succeeded = &succeeded;
            let exhausted = &exhausted;

            s.spawn(move || {
                for sequence in 0..ITERATIONS_PER_THREAD {
                    match pool.allocate_checked([0; 64]) {
                        Some(mut buffer) => {
                            buffer[0] = 1;
                            succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        None => {
                            exhausted.fetch_add(1, Ordering::Relaxed);
                        }
                    }

                    // The global pool is shared by all threads without passing it around.
                    if let Some(job) = alloc_checked(Job { worker, sequence }) {
                        assert_eq!(job.worker, worker);
                        assert_eq!(job.sequence, sequence);
                    }
                }
            });
        }
    });

    println!(
        "Local pool: {} allocations succeeded, {} found the pool exhausted",
        succeeded.load(Ordering::Relaxed),
        exhausted.load(Ordering::Relaxed)
    );
    println!("Local pool after all threads finished: {}", pool.stats());
    println!(
        "Global pool after all threads finished: {}",
        pool_stats::<Job>()
    );
}
