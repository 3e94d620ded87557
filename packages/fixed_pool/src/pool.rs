use std::any::type_name;
use std::convert::Infallible;
use std::fmt;
use std::num::NonZero;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_utils::CachePadded;
use scopeguard::ScopeGuard;
use tracing::{debug, trace, warn};

use crate::{ClaimAttempt, DropPolicy, FixedPoolBuilder, PoolStats, Pooled, Slot};

/// How many compare-and-swap attempts we make on a slot that still looks free before we give up
/// on it and move on to the next one. Weak compare-and-swap may fail even on a free slot.
const MAX_CLAIM_ATTEMPTS_PER_SLOT: usize = 3;

/// A fixed-capacity pool of `T` that can be used from any number of threads at the same time.
///
/// All storage is allocated up front when the pool is created. After that, allocating and
/// deallocating items involves neither the heap nor any lock, and no thread ever waits for
/// another. Each operation either claims a slot with a single atomic compare-and-swap or reports
/// that the pool is exhausted.
///
/// # Allocating items
///
/// There are two families of operations:
///
/// * [`allocate_checked()`][1] and [`allocate_checked_with()`][2] return a [`Pooled`] handle that
///   returns the item to the pool when dropped. These never fail with an error or a panic from the
///   initializer. Any such failure is reported as `None`, the same as an exhausted pool.
/// * [`allocate_unchecked()`][3] and [`allocate_unchecked_with()`][4] return a raw pointer that
///   the caller must eventually pass to [`deallocate_unchecked()`][5]. Initializer errors are
///   returned to the caller and initializer panics are propagated, in both cases after the claimed
///   slot has already been returned to the pool.
///
/// An exhausted pool is never an error: all allocation methods return `None` in that case.
///
/// # Fairness
///
/// There is no ordering guarantee between threads. The pool remembers where the last successful
/// allocation happened and starts the next search just past it, which is only a hint. Concurrent
/// allocations may overwrite each other's hint updates without harm.
///
/// # Example
///
/// ```
/// use fixed_pool::FixedPool;
/// use new_zealand::nz;
///
/// let pool = FixedPool::<String>::new(nz!(2));
///
/// let a = pool.allocate_checked("a".to_string()).unwrap();
/// let b = pool.allocate_checked("b".to_string()).unwrap();
///
/// // The pool only has room for two items.
/// assert!(pool.allocate_checked("c".to_string()).is_none());
///
/// drop(a);
///
/// let c = pool.allocate_checked("c".to_string()).unwrap();
/// assert_eq!(*b, "b");
/// assert_eq!(*c, "c");
/// ```
///
/// [1]: Self::allocate_checked
/// [2]: Self::allocate_checked_with
/// [3]: Self::allocate_unchecked
/// [4]: Self::allocate_unchecked_with
/// [5]: Self::deallocate_unchecked
pub struct FixedPool<T> {
    /// The slice is never resized or reallocated for the lifetime of the pool. This is what allows
    /// `deallocate_unchecked()` to map an item pointer back to its slot via the pointer's offset
    /// from the start of the slice.
    ///
    /// Every slot is padded to a cache line so that claiming one slot does not disturb threads
    /// working with its neighbors.
    slots: Box<[CachePadded<Slot<T>>]>,

    /// Index of the slot where the next search for a free slot starts. Always in bounds.
    next_scan_start: CachePadded<AtomicUsize>,

    capacity: NonZero<usize>,

    drop_policy: DropPolicy,
}

impl<T> FixedPool<T> {
    /// Creates a new pool with room for `capacity` items and the default configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    /// use new_zealand::nz;
    ///
    /// let pool = FixedPool::<u64>::new(nz!(128));
    ///
    /// assert_eq!(pool.capacity().get(), 128);
    /// assert_eq!(pool.stats().used(), 0);
    /// ```
    #[must_use]
    pub fn new(capacity: NonZero<usize>) -> Self {
        Self::builder().capacity(capacity).build()
    }

    /// Starts building a new [`FixedPool`].
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    ///
    /// # Example
    ///
    /// ```
    /// use fixed_pool::{DropPolicy, FixedPool};
    /// use new_zealand::nz;
    ///
    /// let pool = FixedPool::<u32>::builder()
    ///     .capacity(nz!(64))
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    ///
    /// assert_eq!(pool.drop_policy(), DropPolicy::MustNotDropItems);
    /// ```
    pub fn builder() -> FixedPoolBuilder<T> {
        FixedPoolBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(capacity: NonZero<usize>, drop_policy: DropPolicy) -> Self {
        let slots = (0..capacity.get())
            .map(|_| CachePadded::new(Slot::new()))
            .collect::<Box<[_]>>();

        debug!(
            item_type = type_name::<T>(),
            capacity = capacity.get(),
            ?drop_policy,
            "created fixed pool"
        );

        Self {
            slots,
            next_scan_start: CachePadded::new(AtomicUsize::new(0)),
            capacity,
            drop_policy,
        }
    }

    /// The number of items the pool can hold at the same time. This never changes.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> NonZero<usize> {
        self.capacity
    }

    /// The [drop policy][DropPolicy] the pool was created with.
    #[must_use]
    #[inline]
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// Moves `value` into the pool and returns a handle that returns it to the pool when dropped.
    ///
    /// Returns `None` if every slot is occupied, in which case `value` is dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    /// use new_zealand::nz;
    ///
    /// let pool = FixedPool::<Vec<u8>>::new(nz!(4));
    ///
    /// let mut buffer = pool.allocate_checked(Vec::new()).unwrap();
    /// buffer.extend_from_slice(b"hello");
    ///
    /// assert_eq!(buffer.len(), 5);
    /// assert_eq!(pool.stats().used(), 1);
    ///
    /// drop(buffer);
    /// assert_eq!(pool.stats().used(), 0);
    /// ```
    #[must_use]
    pub fn allocate_checked(&self, value: T) -> Option<Pooled<'_, T>> {
        self.allocate_checked_with(|| Ok::<T, Infallible>(value))
    }

    /// Claims a slot, fills it with the item returned by `init` and returns a handle that returns
    /// the item to the pool when dropped.
    ///
    /// `init` is only called once a slot has been claimed, so an exhausted pool does not pay for
    /// constructing an item it has no room for.
    ///
    /// This method never fails loudly. Returns `None` if:
    ///
    /// * every slot is occupied;
    /// * `init` returns an error;
    /// * `init` panics. The panic is caught and does not reach the caller.
    ///
    /// In the failure cases the claimed slot has been returned to the pool before this returns.
    ///
    /// # Example
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    /// use new_zealand::nz;
    ///
    /// let pool = FixedPool::<u16>::new(nz!(4));
    ///
    /// let parsed = pool.allocate_checked_with(|| "1234".parse::<u16>());
    /// assert_eq!(*parsed.unwrap(), 1234);
    ///
    /// let garbage = pool.allocate_checked_with(|| "xyz".parse::<u16>());
    /// assert!(garbage.is_none());
    ///
    /// // The failed attempt did not consume a slot.
    /// assert_eq!(pool.stats().used(), 0);
    /// ```
    #[must_use]
    pub fn allocate_checked_with<F, E>(&self, init: F) -> Option<Pooled<'_, T>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        // The claim guard inside `allocate_unchecked_with()` has already returned the slot by the
        // time a panic gets to us, so nothing observable is left in a broken state.
        match panic::catch_unwind(AssertUnwindSafe(|| self.allocate_unchecked_with(init))) {
            Ok(Ok(Some(ptr))) => Some(Pooled::new(ptr, self)),
            Ok(Ok(None)) => None,
            Ok(Err(_)) => {
                debug!(
                    item_type = type_name::<T>(),
                    error_type = type_name::<E>(),
                    "item initializer returned an error, allocation abandoned"
                );
                None
            }
            Err(_) => {
                warn!(
                    item_type = type_name::<T>(),
                    "item initializer panicked, allocation abandoned"
                );
                None
            }
        }
    }

    /// Moves `value` into the pool and returns a raw pointer to it.
    ///
    /// Returns `None` if every slot is occupied, in which case `value` is dropped.
    ///
    /// The item stays in the pool until the pointer is passed to
    /// [`deallocate_unchecked()`][Self::deallocate_unchecked]. If that never happens, the item is
    /// dropped together with the pool, subject to the pool's [drop policy][DropPolicy].
    ///
    /// The caller has exclusive access to the item through the returned pointer and may create
    /// both shared and exclusive references to it until it is deallocated. The pointer is
    /// invalidated when the item is deallocated or the pool is dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    /// use new_zealand::nz;
    ///
    /// let pool = FixedPool::<u64>::new(nz!(8));
    ///
    /// let ptr = pool.allocate_unchecked(42).unwrap();
    ///
    /// // SAFETY: The item is live and we are the only ones accessing it.
    /// assert_eq!(unsafe { *ptr.as_ref() }, 42);
    ///
    /// // SAFETY: The pointer came from this pool and is not used after this.
    /// unsafe { pool.deallocate_unchecked(Some(ptr)) };
    /// ```
    #[must_use]
    pub fn allocate_unchecked(&self, value: T) -> Option<NonNull<T>> {
        match self.allocate_unchecked_with(|| Ok::<T, Infallible>(value)) {
            Ok(ptr) => ptr,
            Err(never) => match never {},
        }
    }

    /// Claims a slot, fills it with the item returned by `init` and returns a raw pointer to it.
    ///
    /// Returns `Ok(None)` without calling `init` if every slot is occupied.
    ///
    /// If `init` returns an error, the claimed slot is returned to the pool and the error is
    /// returned to the caller. If `init` panics, the claimed slot is returned to the pool and the
    /// panic continues unwinding. Either way, the pool is left exactly as usable as it was before
    /// the call.
    ///
    /// See [`allocate_unchecked()`][Self::allocate_unchecked] for the rules governing the
    /// returned pointer.
    ///
    /// # Example
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    /// use new_zealand::nz;
    ///
    /// let pool = FixedPool::<u16>::new(nz!(1));
    ///
    /// assert!(pool.allocate_unchecked_with(|| "xyz".parse::<u16>()).is_err());
    ///
    /// let ptr = pool
    ///     .allocate_unchecked_with(|| "80".parse::<u16>())
    ///     .unwrap()
    ///     .unwrap();
    ///
    /// // Exhausted pool is not an error.
    /// assert!(matches!(pool.allocate_unchecked_with(|| "1".parse::<u16>()), Ok(None)));
    ///
    /// // SAFETY: The pointer came from this pool and is not used after this.
    /// unsafe { pool.deallocate_unchecked(Some(ptr)) };
    /// ```
    pub fn allocate_unchecked_with<F, E>(&self, init: F) -> Result<Option<NonNull<T>>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let Some(index) = self.claim_any_slot() else {
            trace!(
                item_type = type_name::<T>(),
                capacity = self.capacity.get(),
                "fixed pool exhausted"
            );
            return Ok(None);
        };

        let slot = self.slot(index);

        // If `init` fails, either by returning an error or by panicking, the slot goes straight
        // back to the pool. Nothing was written into it, so there is nothing to drop.
        let claim_guard = scopeguard::guard(slot, |slot| slot.release());

        let value = init()?;

        let slot = ScopeGuard::into_inner(claim_guard);

        // SAFETY: We won the claim on this slot and a free slot never contains an item.
        let ptr = unsafe { slot.write(value) };

        self.next_scan_start
            .store(self.wrapping_index(index, 1), Ordering::Relaxed);

        Ok(Some(ptr))
    }

    /// Drops an item allocated via [`allocate_unchecked()`][Self::allocate_unchecked] or
    /// [`allocate_unchecked_with()`][Self::allocate_unchecked_with] and returns its slot to the
    /// pool.
    ///
    /// Does nothing if `ptr` is `None`.
    ///
    /// If dropping the item panics, the slot is still returned to the pool before the panic
    /// continues unwinding.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that:
    ///
    /// * `ptr` was returned by an allocation from this same pool;
    /// * the item has not already been deallocated;
    /// * no references to the item exist and the pointer is not used after this call.
    ///
    /// In builds with debug assertions enabled, the pool verifies that the pointer refers to an
    /// occupied slot of this pool and panics otherwise. This catches both foreign pointers and
    /// double deallocations. Builds without debug assertions only verify that the pointer maps
    /// into the bounds of the slot array, trusting the caller for everything else.
    pub unsafe fn deallocate_unchecked(&self, ptr: Option<NonNull<T>>) {
        let Some(ptr) = ptr else {
            return;
        };

        let slot = self.slot(self.index_of(ptr));

        debug_assert!(
            !slot.is_available(),
            "deallocated an item of {} whose slot is already free (double deallocation?)",
            type_name::<T>()
        );

        // The slot goes back to the pool even if the item panics while being dropped. We never
        // leave a slot claimed forever just because some destructor misbehaved.
        let _release = scopeguard::guard(slot, |slot| slot.release());

        // SAFETY: The caller guarantees that the pointer came from this pool and that the item is
        // live and unreferenced, which means we (acting for the caller) hold the claim on the slot
        // and the slot contains an item.
        unsafe {
            slot.drop_value();
        }
    }

    /// Takes a best-effort snapshot of how many slots are free and how many are occupied.
    ///
    /// The slots are inspected one by one without any synchronization with concurrent
    /// allocations, so under concurrent use the numbers may not correspond to any single moment
    /// in time. They always add up to the capacity of the pool, though.
    ///
    /// # Example
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    /// use new_zealand::nz;
    ///
    /// let pool = FixedPool::<u32>::new(nz!(10));
    /// let _items: Vec<_> = (0..5).map(|i| pool.allocate_checked(i).unwrap()).collect();
    ///
    /// let stats = pool.stats();
    /// assert_eq!(stats.total(), 10);
    /// assert_eq!(stats.free(), 5);
    /// assert_eq!(stats.used(), 5);
    /// assert!((stats.utilization_percent() - 50.0).abs() < f64::EPSILON);
    /// ```
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let free = self.slots.iter().filter(|slot| slot.is_available()).count();

        PoolStats::new(self.capacity.get(), free)
    }

    /// Makes one pass over all the slots, starting from the scan hint, and claims the first one
    /// that lets us. Returns the index of the claimed slot or `None` if the pool is exhausted.
    fn claim_any_slot(&self) -> Option<usize> {
        let start = self.next_scan_start.load(Ordering::Relaxed);

        for offset in 0..self.capacity.get() {
            let index = self.wrapping_index(start, offset);
            let slot = self.slot(index);

            for _ in 0..MAX_CLAIM_ATTEMPTS_PER_SLOT {
                match slot.try_claim() {
                    ClaimAttempt::Claimed => return Some(index),
                    ClaimAttempt::Spurious => {}
                    ClaimAttempt::Occupied => break,
                }
            }
        }

        None
    }

    /// `(index + offset) % capacity`, for `index` already in bounds and `offset` at most capacity.
    #[must_use]
    fn wrapping_index(&self, index: usize, offset: usize) -> usize {
        let capacity = self.capacity.get();

        // Subtracting first keeps us clear of overflow even for capacities near usize::MAX.
        let remaining = capacity
            .checked_sub(index)
            .expect("slot indexes are always less than the capacity");

        if offset < remaining {
            index
                .checked_add(offset)
                .expect("guarded by the comparison with remaining slots above")
        } else {
            offset
                .checked_sub(remaining)
                .expect("guarded by the comparison with remaining slots above")
        }
    }

    #[must_use]
    fn slot(&self, index: usize) -> &Slot<T> {
        self.slots.get(index).unwrap_or_else(|| {
            panic!(
                "slot index {index} out of bounds in fixed pool of {} with capacity {}",
                type_name::<T>(),
                self.capacity
            )
        })
    }

    /// Maps an item pointer back to the index of the slot that holds it.
    ///
    /// This relies on the slot slice never moving, which is guaranteed because we never resize
    /// or reallocate it.
    #[must_use]
    #[expect(
        clippy::integer_division,
        reason = "an item sits inside its slot, so rounding down lands on the slot start"
    )]
    fn index_of(&self, ptr: NonNull<T>) -> usize {
        let base = self.slots.as_ptr().addr();

        // A pointer below the base wraps around to a huge offset, which the bounds checks reject.
        let offset = ptr.as_ptr().addr().wrapping_sub(base);
        let index = offset
            .checked_div(size_of::<CachePadded<Slot<T>>>())
            .expect("a padded slot is never zero-sized");

        debug_assert!(
            self.slots
                .get(index)
                .is_some_and(|slot| slot.value_ptr() == ptr),
            "pointer {ptr:?} does not refer to an item of fixed pool of {}",
            type_name::<T>()
        );

        index
    }
}

impl<T> Drop for FixedPool<T> {
    fn drop(&mut self) {
        let mut dropped_items: usize = 0;

        for slot in &self.slots {
            // We have exclusive access to the pool, so no claims can be in flight.
            if slot.is_available() {
                continue;
            }

            // SAFETY: An occupied slot always contains an item because a slot is only left
            // occupied after its item has been written. Nobody can reference the item anymore:
            // checked handles borrow the pool and raw pointers are invalidated by dropping it.
            unsafe {
                slot.drop_value();
            }

            slot.release();

            dropped_items = dropped_items
                .checked_add(1)
                .expect("cannot drop more items than there are slots");
        }

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustNotDropItems && !thread::panicking() {
            assert!(
                dropped_items == 0,
                "dropped a fixed pool of {} that still contained {dropped_items} items with a policy that says it must be empty when dropped",
                type_name::<T>()
            );
        }
    }
}

impl<T> fmt::Debug for FixedPool<T> {
    #[cfg_attr(test, mutants::skip)] // Diagnostics only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("capacity", &self.capacity)
            .field("drop_policy", &self.drop_policy)
            .field(
                "next_scan_start",
                &self.next_scan_start.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

// SAFETY: The pool only ever gives out access to an item to the single thread that claimed its
// slot, so sharing the pool never shares an item. Items may however be created on one thread and
// dropped on another (deallocation can happen anywhere), which is why `T: Send` is required.
unsafe impl<T: Send> Sync for FixedPool<T> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(FixedPool<u32>: Send, Sync, fmt::Debug);
    assert_impl_all!(FixedPool<String>: Send, Sync);
    assert_not_impl_any!(FixedPool<Rc<u32>>: Send, Sync);
    assert_impl_all!(FixedPool<Cell<u32>>: Send, Sync);

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn smoke_test() {
        let pool = FixedPool::<u32>::new(nz!(3));

        let a = pool.allocate_unchecked(42).unwrap();
        let b = pool.allocate_unchecked(43).unwrap();
        let c = pool.allocate_unchecked(44).unwrap();

        unsafe {
            assert_eq!(*a.as_ref(), 42);
            assert_eq!(*b.as_ref(), 43);
            assert_eq!(*c.as_ref(), 44);
        }

        assert!(pool.allocate_unchecked(45).is_none());

        unsafe {
            pool.deallocate_unchecked(Some(b));
        }

        let d = pool.allocate_unchecked(46).unwrap();

        unsafe {
            assert_eq!(*a.as_ref(), 42);
            assert_eq!(*c.as_ref(), 44);
            assert_eq!(*d.as_ref(), 46);

            pool.deallocate_unchecked(Some(a));
            pool.deallocate_unchecked(Some(c));
            pool.deallocate_unchecked(Some(d));
        }

        assert_eq!(pool.stats().used(), 0);
    }

    #[test]
    fn capacity_three_scenario() {
        let pool = FixedPool::<u32>::new(nz!(3));

        let a = pool.allocate_unchecked(1).unwrap();
        let b = pool.allocate_unchecked(2).unwrap();
        let c = pool.allocate_unchecked(3).unwrap();

        let addresses: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(addresses.len(), 3);

        assert!(pool.allocate_unchecked(4).is_none());

        unsafe { pool.deallocate_unchecked(Some(b)) };

        // Capacity is recovered. The freed slot is the only free one, so it must be reused.
        let e = pool.allocate_unchecked(5).unwrap();
        assert_eq!(e, b);

        unsafe {
            pool.deallocate_unchecked(Some(a));
            pool.deallocate_unchecked(Some(c));
            pool.deallocate_unchecked(Some(e));
        }

        let stats = pool.stats();
        assert_eq!(stats.free(), 3);
        assert_eq!(stats.used(), 0);
    }

    #[test]
    fn capacity_one() {
        let pool = FixedPool::<u64>::new(nz!(1));

        let a = pool.allocate_checked(1).unwrap();
        assert!(pool.allocate_checked(2).is_none());

        drop(a);

        let b = pool.allocate_checked(3).unwrap();
        assert_eq!(*b, 3);
    }

    #[test]
    fn deallocate_none_is_noop() {
        let pool = FixedPool::<String>::new(nz!(2));

        unsafe {
            pool.deallocate_unchecked(None);
        }

        let item = pool.allocate_unchecked("still works".to_string()).unwrap();
        assert_eq!(pool.stats().used(), 1);

        unsafe {
            pool.deallocate_unchecked(Some(item));
        }
    }

    #[test]
    fn deallocate_drops_item() {
        let drops = Arc::new(AtomicUsize::new(0));
        let pool = FixedPool::<DropCounter>::new(nz!(2));

        let item = pool
            .allocate_unchecked(DropCounter(Arc::clone(&drops)))
            .unwrap();
        assert_eq!(drops.load(Ordering::Relaxed), 0);

        unsafe {
            pool.deallocate_unchecked(Some(item));
        }
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn exhausted_pool_drops_rejected_value() {
        let drops = Arc::new(AtomicUsize::new(0));
        let pool = FixedPool::<DropCounter>::new(nz!(1));

        let kept = pool
            .allocate_checked(DropCounter(Arc::clone(&drops)))
            .unwrap();
        assert!(
            pool.allocate_checked(DropCounter(Arc::clone(&drops)))
                .is_none()
        );
        assert_eq!(drops.load(Ordering::Relaxed), 1);

        drop(kept);
        assert_eq!(drops.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn exhausted_pool_does_not_call_initializer() {
        let pool = FixedPool::<u32>::new(nz!(1));
        let _item = pool.allocate_checked(1).unwrap();

        let result = pool.allocate_unchecked_with(|| -> Result<u32, ()> {
            panic!("initializer must not be called when there is no free slot")
        });

        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn unchecked_initializer_error_is_returned_and_slot_released() {
        let pool = FixedPool::<u32>::new(nz!(2));

        let result = pool.allocate_unchecked_with(|| Err::<u32, _>("boom"));
        assert_eq!(result, Err("boom"));

        let stats = pool.stats();
        assert_eq!(stats.used(), 0);
        assert_eq!(stats.free(), 2);

        // Both slots are still usable.
        let a = pool.allocate_unchecked(1).unwrap();
        let b = pool.allocate_unchecked(2).unwrap();

        unsafe {
            pool.deallocate_unchecked(Some(a));
            pool.deallocate_unchecked(Some(b));
        }
    }

    #[test]
    fn unchecked_initializer_panic_propagates_and_slot_released() {
        let pool = FixedPool::<u32>::new(nz!(1));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.allocate_unchecked_with(|| -> Result<u32, ()> { panic!("constructor failed") })
        }));
        assert!(result.is_err());

        assert_eq!(pool.stats().used(), 0);

        let item = pool.allocate_unchecked(7).unwrap();
        unsafe { pool.deallocate_unchecked(Some(item)) };
    }

    #[test]
    fn checked_initializer_error_is_none() {
        let pool = FixedPool::<u32>::new(nz!(1));

        assert!(pool.allocate_checked_with(|| Err::<u32, _>("boom")).is_none());
        assert_eq!(pool.stats().used(), 0);

        // The one and only slot was given back.
        let item = pool.allocate_checked_with(|| Ok::<_, ()>(5)).unwrap();
        assert_eq!(*item, 5);
    }

    #[test]
    fn checked_initializer_panic_is_none() {
        let pool = FixedPool::<u32>::new(nz!(1));

        let item = pool.allocate_checked_with(|| -> Result<u32, ()> { panic!("nope") });
        assert!(item.is_none());
        assert_eq!(pool.stats().used(), 0);

        assert!(pool.allocate_checked(6).is_some());
    }

    #[test]
    fn hint_moves_past_last_claim() {
        let pool = FixedPool::<u32>::new(nz!(4));

        let a = pool.allocate_unchecked(1).unwrap();
        let b = pool.allocate_unchecked(2).unwrap();

        unsafe { pool.deallocate_unchecked(Some(a)) };

        // Slot 0 is free again but the search starts after the last claim, at slot 2.
        let c = pool.allocate_unchecked(3).unwrap();
        assert_eq!(pool.index_of(c), 2);

        unsafe {
            pool.deallocate_unchecked(Some(b));
            pool.deallocate_unchecked(Some(c));
        }
    }

    #[test]
    fn scan_wraps_around() {
        let pool = FixedPool::<u32>::new(nz!(3));

        let items: Vec<_> = (0..3).map(|i| pool.allocate_unchecked(i).unwrap()).collect();

        // The hint now points back to slot 0, which is occupied; only slot 1 is free.
        unsafe { pool.deallocate_unchecked(Some(items[1])) };

        let reused = pool.allocate_unchecked(10).unwrap();
        assert_eq!(reused, items[1]);

        unsafe {
            pool.deallocate_unchecked(Some(items[0]));
            pool.deallocate_unchecked(Some(reused));
            pool.deallocate_unchecked(Some(items[2]));
        }
    }

    #[test]
    fn wrapping_index_stays_in_bounds() {
        let pool = FixedPool::<u8>::new(nz!(5));

        assert_eq!(pool.wrapping_index(0, 0), 0);
        assert_eq!(pool.wrapping_index(0, 4), 4);
        assert_eq!(pool.wrapping_index(3, 1), 4);
        assert_eq!(pool.wrapping_index(3, 2), 0);
        assert_eq!(pool.wrapping_index(4, 4), 3);
        assert_eq!(pool.wrapping_index(4, 1), 0);
    }

    #[test]
    fn index_of_maps_back_to_slot() {
        let pool = FixedPool::<u64>::new(nz!(8));

        let items: Vec<_> = (0..8).map(|i| pool.allocate_unchecked(i).unwrap()).collect();

        for (expected_index, item) in items.iter().enumerate() {
            assert_eq!(pool.index_of(*item), expected_index);
        }

        for item in items {
            unsafe { pool.deallocate_unchecked(Some(item)) };
        }
    }

    #[test]
    fn respects_item_alignment() {
        #[repr(align(256))]
        struct Aligned(u8);

        let pool = FixedPool::<Aligned>::new(nz!(4));

        let items: Vec<_> = (0..4)
            .map(|i| pool.allocate_checked(Aligned(i)).unwrap())
            .collect();

        for (i, item) in (0..4).zip(&items) {
            assert_eq!(item.0, i);
            assert_eq!(item.ptr().unwrap().as_ptr().addr() % 256, 0);
        }
    }

    #[test]
    fn zero_sized_items() {
        let pool = FixedPool::<()>::new(nz!(2));

        let a = pool.allocate_unchecked(()).unwrap();
        let b = pool.allocate_unchecked(()).unwrap();
        assert_ne!(a, b);
        assert!(pool.allocate_unchecked(()).is_none());

        unsafe {
            pool.deallocate_unchecked(Some(a));
            pool.deallocate_unchecked(Some(b));
        }
    }

    #[test]
    fn deallocate_releases_slot_even_if_drop_panics() {
        struct PanicOnDrop;

        impl Drop for PanicOnDrop {
            fn drop(&mut self) {
                panic!("drop failed");
            }
        }

        let pool = FixedPool::<PanicOnDrop>::new(nz!(1));
        let item = pool.allocate_unchecked(PanicOnDrop).unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
            pool.deallocate_unchecked(Some(item));
        }));
        assert!(result.is_err());

        assert_eq!(pool.stats().used(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn double_deallocate_panics_in_debug() {
        let pool = FixedPool::<u32>::new(nz!(2));
        let item = pool.allocate_unchecked(1).unwrap();

        unsafe {
            pool.deallocate_unchecked(Some(item));
            pool.deallocate_unchecked(Some(item));
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn foreign_pointer_panics_in_debug() {
        let pool = FixedPool::<u32>::new(nz!(2));
        let other = FixedPool::<u32>::new(nz!(2));

        let item = other.allocate_unchecked(1).unwrap();

        unsafe {
            pool.deallocate_unchecked(Some(item));
        }
    }

    #[test]
    fn drop_pool_drops_leftover_items() {
        let drops = Arc::new(AtomicUsize::new(0));

        {
            let pool = FixedPool::<DropCounter>::new(nz!(4));

            _ = pool
                .allocate_unchecked(DropCounter(Arc::clone(&drops)))
                .unwrap();
            _ = pool
                .allocate_unchecked(DropCounter(Arc::clone(&drops)))
                .unwrap();
        }

        assert_eq!(drops.load(Ordering::Relaxed), 2);
    }

    #[test]
    #[should_panic]
    fn drop_item_with_forbidden_to_drop_policy_panics() {
        let pool = FixedPool::<u32>::builder()
            .capacity(nz!(2))
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        _ = pool.allocate_unchecked(123).unwrap();
    }

    #[test]
    fn drop_itemless_with_forbidden_to_drop_policy_ok() {
        let pool = FixedPool::<u32>::builder()
            .capacity(nz!(2))
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        let item = pool.allocate_checked(5).unwrap();
        drop(item);

        drop(pool);
    }

    #[test]
    fn stats_add_up() {
        let pool = FixedPool::<u32>::new(nz!(10));

        let items: Vec<_> = (0..7).map(|i| pool.allocate_checked(i).unwrap()).collect();

        let stats = pool.stats();
        assert_eq!(stats.total(), 10);
        assert_eq!(stats.used(), 7);
        assert_eq!(stats.free(), 3);
        assert_eq!(stats.free() + stats.used(), stats.total());

        drop(items);

        assert_eq!(pool.stats().free(), 10);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Too slow under Miri.
    fn concurrent_claims_never_overlap() {
        const THREADS: usize = 8;
        const CAPACITY: usize = 64;

        let pool = FixedPool::<usize>::new(nz!(CAPACITY));

        let claimed = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|thread_index| {
                    let pool = &pool;
                    s.spawn(move || {
                        let mut mine = Vec::new();
                        while let Some(ptr) = pool.allocate_unchecked(thread_index) {
                            mine.push(ptr.as_ptr().addr());
                        }
                        mine
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect::<Vec<_>>()
        });

        // Every slot was claimed exactly once across all the threads.
        assert_eq!(claimed.len(), CAPACITY);
        assert_eq!(claimed.iter().collect::<HashSet<_>>().len(), CAPACITY);
        assert_eq!(pool.stats().used(), CAPACITY);
    }
}
