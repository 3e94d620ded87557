//! Integration tests for `fixed_pool` that exercise the public API the way a user would.

use std::num::ParseIntError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fixed_pool::{
    DropPolicy, Error, FixedPool, PoolRegistry, Pooled, alloc_checked, alloc_unchecked,
    free_unchecked, global_pool, pool_stats,
};
use new_zealand::nz;

#[derive(Debug, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

struct Tracked {
    drops: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn capacity_three_walkthrough() {
    let pool = FixedPool::<u32>::new(nz!(3));

    let a = pool.allocate_unchecked(1).unwrap();
    let b = pool.allocate_unchecked(2).unwrap();
    let c = pool.allocate_unchecked(3).unwrap();

    assert!(pool.allocate_unchecked(4).is_none());
    assert_eq!(pool.stats().used(), 3);

    // SAFETY: The pointer came from this pool and is not used after this.
    unsafe { pool.deallocate_unchecked(Some(b)) };

    let d = pool.allocate_unchecked(5).unwrap();

    // The only free slot is the one that `b` returned.
    assert_eq!(d, b);

    // SAFETY: All pointers are live items of this pool.
    unsafe {
        assert_eq!(*a.as_ref(), 1);
        assert_eq!(*c.as_ref(), 3);
        assert_eq!(*d.as_ref(), 5);
    }

    // SAFETY: Each pointer came from this pool and is not used after this.
    unsafe {
        pool.deallocate_unchecked(Some(a));
        pool.deallocate_unchecked(Some(c));
        pool.deallocate_unchecked(Some(d));
    }

    assert_eq!(pool.stats().used(), 0);
}

#[test]
fn handles_and_raw_pointers_share_slots() {
    let pool = FixedPool::<Point>::new(nz!(2));

    let handle = pool.allocate_checked(Point { x: 1, y: 2 }).unwrap();
    let raw = pool.allocate_unchecked(Point { x: 3, y: 4 }).unwrap();

    assert!(pool.allocate_checked(Point { x: 5, y: 6 }).is_none());
    assert_eq!(*handle, Point { x: 1, y: 2 });

    drop(handle);

    let replacement = pool.allocate_checked(Point { x: 7, y: 8 }).unwrap();
    assert_eq!(replacement.x, 7);

    // SAFETY: The pointer came from this pool and is not used after this.
    unsafe { pool.deallocate_unchecked(Some(raw)) };

    assert_eq!(pool.stats().used(), 1);
}

#[test]
fn failed_initializer_leaves_pool_unchanged() {
    let pool = FixedPool::<u16>::new(nz!(1));

    let result: Result<Option<_>, ParseIntError> =
        pool.allocate_unchecked_with(|| "not a number".parse());

    assert!(result.is_err());
    assert_eq!(pool.stats().used(), 0);

    let checked = pool.allocate_checked_with(|| "123".parse::<u16>()).unwrap();
    assert_eq!(*checked, 123);
}

#[test]
fn leftover_raw_items_dropped_with_pool() {
    let drops = Arc::new(AtomicUsize::new(0));

    {
        let pool = FixedPool::<Tracked>::new(nz!(4));

        for _ in 0..3 {
            _ = pool
                .allocate_unchecked(Tracked {
                    drops: Arc::clone(&drops),
                })
                .unwrap();
        }

        assert_eq!(drops.load(Ordering::Relaxed), 0);
    }

    assert_eq!(drops.load(Ordering::Relaxed), 3);
}

#[test]
#[should_panic]
fn leftover_raw_items_panic_under_strict_policy() {
    let pool = FixedPool::<u32>::builder()
        .capacity(nz!(2))
        .drop_policy(DropPolicy::MustNotDropItems)
        .build();

    _ = pool.allocate_unchecked(1).unwrap();
}

#[test]
fn empty_handle_can_be_replaced() {
    let pool = FixedPool::<u32>::new(nz!(1));

    let mut slot_holder: Pooled<'_, u32> = Pooled::default();
    assert!(slot_holder.is_empty());

    slot_holder = pool.allocate_checked(99).unwrap();
    assert_eq!(*slot_holder, 99);

    slot_holder = Pooled::default();
    assert!(slot_holder.is_empty());
    assert_eq!(pool.stats().used(), 0);
}

#[test]
fn registry_pools_are_independent() {
    let registry = PoolRegistry::builder()
        .register::<Point>(nz!(2))
        .unwrap()
        .register::<u64>(nz!(1))
        .unwrap()
        .build();

    let point = registry.alloc_checked(Point { x: 0, y: 0 }).unwrap().unwrap();
    let number = registry.alloc_checked(5_u64).unwrap().unwrap();

    // The u64 pool is full but the Point pool still has room.
    assert!(registry.alloc_checked(6_u64).unwrap().is_none());
    assert!(registry.alloc_checked(Point { x: 1, y: 1 }).unwrap().is_some());

    assert_eq!(point.y, 0);
    assert_eq!(*number, 5);

    assert!(matches!(
        registry.stats::<i8>(),
        Err(Error::NotRegistered { .. })
    ));
}

struct Session {
    user: &'static str,
}

global_pool!(Session, 2);

#[test]
fn global_pool_by_type() {
    let stats = pool_stats::<Session>();
    assert_eq!(stats.total(), 2);
    assert_eq!(stats.used(), 0);

    let alice = alloc_checked(Session { user: "alice" }).unwrap();
    let bob = alloc_unchecked(Session { user: "bob" }).unwrap();

    assert!(alloc_checked(Session { user: "carol" }).is_none());
    assert_eq!(alice.user, "alice");

    // SAFETY: The pointer is a live item of the global pool.
    assert_eq!(unsafe { bob.as_ref() }.user, "bob");

    drop(alice);

    // SAFETY: The pointer came from the global pool and is not used after this.
    unsafe { free_unchecked(Some(bob)) };

    assert_eq!(pool_stats::<Session>().used(), 0);
}
