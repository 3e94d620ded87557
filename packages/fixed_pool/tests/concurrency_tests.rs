//! Multithreaded tests for `fixed_pool`.
//!
//! These hammer a single pool from many threads and verify that no slot is ever handed out to two
//! owners at once and that every slot is eventually returned.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Barrier, Mutex};
use std::thread;

use fixed_pool::FixedPool;
use new_zealand::nz;

const THREAD_COUNT: usize = 8;
const CYCLES_PER_THREAD: usize = 2_000;

#[test]
#[cfg_attr(miri, ignore)] // Too slow under Miri.
fn many_threads_allocate_and_release() {
    let pool = FixedPool::<(usize, usize)>::new(nz!(16));
    let succeeded = AtomicUsize::new(0);

    thread::scope(|s| {
        for thread_index in 0..THREAD_COUNT {
            let pool = &pool;
            let succeeded = &succeeded;

            s.spawn(move || {
                for cycle in 0..CYCLES_PER_THREAD {
                    if let Some(item) = pool.allocate_checked((thread_index, cycle)) {
                        // If anyone else had been handed the same slot, this would break.
                        assert_eq!(*item, (thread_index, cycle));
                        succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert!(succeeded.load(Ordering::Relaxed) > 0);

    let stats = pool.stats();
    assert_eq!(stats.used(), 0);
    assert_eq!(stats.free(), 16);
}

#[test]
#[cfg_attr(miri, ignore)] // Too slow under Miri.
fn held_items_are_never_shared() {
    const CAPACITY: usize = 32;

    let pool = FixedPool::<usize>::new(nz!(CAPACITY));
    let held = Mutex::new(HashSet::new());
    let barrier = Barrier::new(THREAD_COUNT);

    thread::scope(|s| {
        for thread_index in 0..THREAD_COUNT {
            let pool = &pool;
            let held = &held;
            let barrier = &barrier;

            s.spawn(move || {
                barrier.wait();

                for _ in 0..CYCLES_PER_THREAD {
                    let Some(ptr) = pool.allocate_unchecked(thread_index) else {
                        continue;
                    };

                    let address = ptr.as_ptr().addr();
                    assert!(
                        held.lock().unwrap().insert(address),
                        "slot handed out twice"
                    );

                    // SAFETY: We own the item until we deallocate it below.
                    assert_eq!(unsafe { *ptr.as_ref() }, thread_index);

                    assert!(held.lock().unwrap().remove(&address));

                    // SAFETY: The pointer came from this pool and is not used after this.
                    unsafe { pool.deallocate_unchecked(Some(ptr)) };
                }
            });
        }
    });

    assert!(held.lock().unwrap().is_empty());
    assert_eq!(pool.stats().used(), 0);
}

#[test]
#[cfg_attr(miri, ignore)] // Too slow under Miri.
fn stats_stay_consistent_under_load() {
    const CAPACITY: usize = 8;

    let pool = FixedPool::<u64>::new(nz!(CAPACITY));
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..4 {
            let pool = &pool;
            let done = &done;

            s.spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let _item = pool.allocate_checked(42);
                }
            });
        }

        for _ in 0..1_000 {
            let stats = pool.stats();

            assert_eq!(stats.total(), CAPACITY);
            assert!(stats.used() <= CAPACITY);
            assert_eq!(stats.free().checked_add(stats.used()), Some(CAPACITY));
        }

        done.store(true, Ordering::Relaxed);
    });

    assert_eq!(pool.stats().used(), 0);
}

#[test]
#[cfg_attr(miri, ignore)] // Too slow under Miri.
fn exactly_capacity_items_fit_when_racing() {
    const CAPACITY: usize = 64;
    const ATTEMPTS_PER_THREAD: usize = CAPACITY;

    let pool = FixedPool::<usize>::new(nz!(CAPACITY));
    let barrier = Barrier::new(THREAD_COUNT);

    let claimed: Vec<Vec<NonNull<usize>>> = thread::scope(|s| {
        let workers: Vec<_> = (0..THREAD_COUNT)
            .map(|thread_index| {
                let pool = &pool;
                let barrier = &barrier;

                s.spawn(move || {
                    barrier.wait();

                    (0..ATTEMPTS_PER_THREAD)
                        .filter_map(|_| pool.allocate_unchecked(thread_index))
                        .map(SendPtr)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| {
                worker
                    .join()
                    .unwrap()
                    .into_iter()
                    .map(|ptr| ptr.0)
                    .collect()
            })
            .collect()
    });

    let all: Vec<NonNull<usize>> = claimed.into_iter().flatten().collect();
    let distinct: HashSet<_> = all.iter().copied().collect();

    // Many more attempts than slots, yet exactly every slot was claimed once.
    assert_eq!(all.len(), CAPACITY);
    assert_eq!(distinct.len(), CAPACITY);
    assert!(pool.allocate_unchecked(0).is_none());

    for ptr in all {
        // SAFETY: Every pointer came from this pool and is deallocated exactly once.
        unsafe { pool.deallocate_unchecked(Some(ptr)) };
    }

    assert_eq!(pool.stats().used(), 0);
}

/// Lets a worker thread hand its claimed pointers back to the test thread.
struct SendPtr(NonNull<usize>);

// SAFETY: The pointers refer to items in a pool that outlives all the threads and are only used
// by one thread at a time.
unsafe impl Send for SendPtr {}
