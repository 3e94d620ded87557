use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::FixedPool;

/// Exclusive owning handle to an item in a [`FixedPool`].
///
/// Returned by [`FixedPool::allocate_checked()`] and [`FixedPool::allocate_checked_with()`].
/// Dropping the handle drops the item and returns its slot to the pool. The handle borrows the
/// pool, so the pool is guaranteed to outlive it.
///
/// The handle cannot be copied or cloned because two owners of the same slot would return it to the
/// pool twice. It can be moved freely, including to other threads if `T` is [`Send`].
///
/// A handle may also be empty, either because it was created via [`Default`] or because the item
/// has already been [released][Self::release]. An empty handle owns nothing and dropping or
/// releasing it does nothing.
///
/// # Examples
///
/// ```
/// use fixed_pool::FixedPool;
/// use new_zealand::nz;
///
/// let pool = FixedPool::<String>::new(nz!(1));
///
/// let mut greeting = pool.allocate_checked("Hello".to_string()).unwrap();
/// greeting.push_str(", world");
/// assert_eq!(*greeting, "Hello, world");
///
/// // Returns the item to the pool early. Calling this again is harmless.
/// greeting.release();
/// greeting.release();
///
/// assert!(greeting.is_empty());
/// assert!(pool.allocate_checked("Again".to_string()).is_some());
/// ```
pub struct Pooled<'p, T> {
    claim: Option<Claim<'p, T>>,

    // We own a `T`, as far as the drop checker is concerned.
    _item: PhantomData<T>,
}

struct Claim<'p, T> {
    ptr: NonNull<T>,
    pool: &'p FixedPool<T>,
}

impl<'p, T> Pooled<'p, T> {
    #[must_use]
    pub(crate) fn new(ptr: NonNull<T>, pool: &'p FixedPool<T>) -> Self {
        Self {
            claim: Some(Claim { ptr, pool }),
            _item: PhantomData,
        }
    }

    /// Whether the handle owns nothing, either because it never did or because its item has
    /// already been released.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.claim.is_none()
    }

    /// A shared reference to the item, or `None` if the handle is empty.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.claim.as_ref().map(|claim| {
            // SAFETY: A non-empty handle owns a live item and exclusive access to it. Handing
            // out a shared reference tied to `&self` cannot conflict with anything.
            unsafe { claim.ptr.as_ref() }
        })
    }

    /// An exclusive reference to the item, or `None` if the handle is empty.
    #[must_use]
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.claim.as_mut().map(|claim| {
            // SAFETY: A non-empty handle owns a live item and exclusive access to it. The
            // reference is tied to `&mut self`, so no other reference can be created meanwhile.
            unsafe { claim.ptr.as_mut() }
        })
    }

    /// Pointer to the item, or `None` if the handle is empty.
    ///
    /// The pointer is valid until the handle is released or dropped.
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> Option<NonNull<T>> {
        self.claim.as_ref().map(|claim| claim.ptr)
    }

    /// Drops the item and returns its slot to the pool, leaving the handle empty.
    ///
    /// Does nothing if the handle is already empty.
    pub fn release(&mut self) {
        if let Some(claim) = self.claim.take() {
            // SAFETY: The pointer came from this pool and the handle was its only owner. We just
            // took it out of the handle, so it cannot be used or released again.
            unsafe {
                claim.pool.deallocate_unchecked(Some(claim.ptr));
            }
        }
    }

    /// Gives up ownership of the item without returning it to the pool.
    ///
    /// Returns `None` if the handle is empty. The item must later be returned to the same pool
    /// via [`FixedPool::deallocate_unchecked()`]. If it never is, the pool drops the item when
    /// the pool itself is dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    /// use new_zealand::nz;
    ///
    /// let pool = FixedPool::<u64>::new(nz!(4));
    ///
    /// let handle = pool.allocate_checked(9).unwrap();
    /// let ptr = handle.into_raw();
    ///
    /// // The slot is still occupied after the handle is gone.
    /// assert_eq!(pool.stats().used(), 1);
    ///
    /// // SAFETY: The pointer came from this pool and is not used after this.
    /// unsafe { pool.deallocate_unchecked(ptr) };
    /// assert_eq!(pool.stats().used(), 0);
    /// ```
    #[must_use]
    pub fn into_raw(mut self) -> Option<NonNull<T>> {
        self.claim.take().map(|claim| claim.ptr)
    }
}

impl<T> Default for Pooled<'_, T> {
    /// Creates an empty handle that owns nothing.
    fn default() -> Self {
        Self {
            claim: None,
            _item: PhantomData,
        }
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.get()
            .unwrap_or_else(|| panic!("dereferenced an empty Pooled<{}>", type_name::<T>()))
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
            .unwrap_or_else(|| panic!("dereferenced an empty Pooled<{}>", type_name::<T>()))
    }
}

impl<T> fmt::Debug for Pooled<'_, T> {
    #[cfg_attr(test, mutants::skip)] // Diagnostics only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("ptr", &self.ptr())
            .finish()
    }
}

// SAFETY: The handle is a fancy `Box<T>` whose storage lives in the pool. Moving it to another
// thread moves the item there (hence `T: Send`) and the item will be dropped there, which the
// pool supports for any `T: Send`.
unsafe impl<T: Send> Send for Pooled<'_, T> {}

// SAFETY: Sharing the handle only gives out `&T` (hence `T: Sync`). Releasing requires `&mut`.
unsafe impl<T: Sync> Sync for Pooled<'_, T> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(Pooled<'static, u32>: Send, Sync, fmt::Debug, Default);
    assert_impl_all!(Pooled<'static, Cell<u32>>: Send);
    assert_not_impl_any!(Pooled<'static, u32>: Clone, Copy);
    assert_not_impl_any!(Pooled<'static, Cell<u32>>: Sync);
    assert_not_impl_any!(Pooled<'static, Rc<u32>>: Send, Sync);

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn drop_returns_item_to_pool() {
        let drops = Arc::new(AtomicUsize::new(0));
        let pool = FixedPool::<DropCounter>::new(nz!(1));

        {
            let _item = pool
                .allocate_checked(DropCounter(Arc::clone(&drops)))
                .unwrap();
            assert_eq!(pool.stats().used(), 1);
        }

        assert_eq!(pool.stats().used(), 0);
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let drops = Arc::new(AtomicUsize::new(0));
        let pool = FixedPool::<DropCounter>::new(nz!(2));

        let mut item = pool
            .allocate_checked(DropCounter(Arc::clone(&drops)))
            .unwrap();

        item.release();
        item.release();
        drop(item);

        assert_eq!(drops.load(Ordering::Relaxed), 1);
        assert_eq!(pool.stats().used(), 0);
    }

    #[test]
    fn reassignment_releases_previous_item() {
        let pool = FixedPool::<u32>::new(nz!(2));

        let mut item = pool.allocate_checked(1).unwrap();
        assert_eq!(pool.stats().used(), 1);

        item = pool.allocate_checked(2).unwrap();

        assert_eq!(*item, 2);
        assert_eq!(pool.stats().used(), 1);
    }

    #[test]
    fn default_is_empty() {
        let mut item = Pooled::<u32>::default();

        assert!(item.is_empty());
        assert!(item.get().is_none());
        assert!(item.get_mut().is_none());
        assert!(item.ptr().is_none());

        item.release();
        assert!(item.into_raw().is_none());
    }

    #[test]
    #[should_panic]
    fn deref_empty_panics() {
        let item = Pooled::<u32>::default();

        let _value: u32 = *item;
    }

    #[test]
    fn deref_and_deref_mut() {
        let pool = FixedPool::<String>::new(nz!(1));

        let mut item = pool.allocate_checked("Hello".to_string()).unwrap();

        assert_eq!(item.len(), 5);
        item.push_str(", World!");
        assert_eq!(&*item, "Hello, World!");
        assert_eq!(item.get().map(String::as_str), Some("Hello, World!"));
    }

    #[test]
    fn into_raw_keeps_slot_occupied() {
        let drops = Arc::new(AtomicUsize::new(0));
        let pool = FixedPool::<DropCounter>::new(nz!(1));

        let item = pool
            .allocate_checked(DropCounter(Arc::clone(&drops)))
            .unwrap();
        let ptr = item.into_raw();

        assert!(ptr.is_some());
        assert_eq!(drops.load(Ordering::Relaxed), 0);
        assert!(
            pool.allocate_checked(DropCounter(Arc::clone(&drops)))
                .is_none()
        );

        unsafe { pool.deallocate_unchecked(ptr) };

        // One drop for the rejected value, one for the deallocated item.
        assert_eq!(drops.load(Ordering::Relaxed), 2);
        assert_eq!(pool.stats().used(), 0);
    }

    #[test]
    fn moved_to_other_thread_and_dropped_there() {
        let pool = FixedPool::<String>::new(nz!(1));

        let item = pool.allocate_checked("travels".to_string()).unwrap();

        thread::scope(|s| {
            s.spawn(move || {
                assert_eq!(*item, "travels");
            });
        });

        assert_eq!(pool.stats().used(), 0);
        assert!(pool.allocate_checked("home again".to_string()).is_some());
    }
}
