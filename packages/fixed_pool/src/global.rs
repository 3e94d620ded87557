use std::ptr::NonNull;

use crate::{FixedPool, PoolStats, Pooled};

/// An item type that has a process-wide [`FixedPool`] of its own.
///
/// Do not implement this by hand. Use [`global_pool!`][crate::global_pool], which creates the
/// pool lazily on first use with the declared capacity and keeps it alive until the process
/// exits.
///
/// Once a type has a global pool, the free functions in this crate ([`alloc_checked()`],
/// [`alloc_unchecked()`], [`free_unchecked()`] and friends) can allocate it by type alone.
pub trait GlobalPool: Sized + Send + 'static {
    /// The process-wide pool for items of this type.
    fn global_pool() -> &'static FixedPool<Self>;
}

/// Declares a process-wide [`FixedPool`] for an item type, with the given capacity.
///
/// The capacity must be a constant expression that evaluates to a non-zero `usize`; this is
/// checked at compile time. The pool itself is created on first use, from whichever thread gets
/// there first.
///
/// Each type can have at most one global pool. Declaring a second one for the same type is a
/// compile error. Only types defined in the current crate can be given a global pool.
///
/// # Example
///
/// ```
/// use fixed_pool::{alloc_checked, global_pool, pool_stats};
///
/// struct Connection {
///     port: u16,
/// }
///
/// global_pool!(Connection, 64);
///
/// let connection = alloc_checked(Connection { port: 8080 }).unwrap();
/// assert_eq!(connection.port, 8080);
///
/// assert_eq!(pool_stats::<Connection>().total(), 64);
/// assert_eq!(pool_stats::<Connection>().used(), 1);
/// ```
#[macro_export]
macro_rules! global_pool {
    ($item:ty, $capacity:expr $(,)?) => {
        impl $crate::GlobalPool for $item {
            fn global_pool() -> &'static $crate::FixedPool<Self> {
                static POOL: ::std::sync::LazyLock<$crate::FixedPool<$item>> =
                    ::std::sync::LazyLock::new(|| {
                        $crate::FixedPool::new($crate::__private::nz!($capacity))
                    });

                &POOL
            }
        }
    };
}

/// Moves `value` into the global pool for `T`.
///
/// Returns `None` if the pool is exhausted. See [`FixedPool::allocate_checked()`].
#[must_use]
pub fn alloc_checked<T: GlobalPool>(value: T) -> Option<Pooled<'static, T>> {
    T::global_pool().allocate_checked(value)
}

/// Creates an item in the global pool for `T` using `init`.
///
/// Returns `None` if the pool is exhausted or if `init` fails or panics.
/// See [`FixedPool::allocate_checked_with()`].
#[must_use]
pub fn alloc_checked_with<T, F, E>(init: F) -> Option<Pooled<'static, T>>
where
    T: GlobalPool,
    F: FnOnce() -> Result<T, E>,
{
    T::global_pool().allocate_checked_with(init)
}

/// Moves `value` into the global pool for `T`, returning a raw pointer to it.
///
/// The item must be returned via [`free_unchecked()`]. Returns `None` if the pool is exhausted.
/// See [`FixedPool::allocate_unchecked()`].
#[must_use]
pub fn alloc_unchecked<T: GlobalPool>(value: T) -> Option<NonNull<T>> {
    T::global_pool().allocate_unchecked(value)
}

/// Creates an item in the global pool for `T` using `init`, returning a raw pointer to it.
///
/// The item must be returned via [`free_unchecked()`]. See [`FixedPool::allocate_unchecked_with()`].
///
/// # Errors
///
/// Returns the error from `init` if it fails. An exhausted pool is not an error but `Ok(None)`.
///
/// # Panics
///
/// Propagates any panic from `init`. The claimed slot is returned to the pool before that.
pub fn alloc_unchecked_with<T, F, E>(init: F) -> Result<Option<NonNull<T>>, E>
where
    T: GlobalPool,
    F: FnOnce() -> Result<T, E>,
{
    T::global_pool().allocate_unchecked_with(init)
}

/// Drops an item allocated via [`alloc_unchecked()`] or [`alloc_unchecked_with()`] and returns
/// its slot to the global pool for `T`. Does nothing if `ptr` is `None`.
///
/// # Safety
///
/// Same as [`FixedPool::deallocate_unchecked()`], with "this pool" being the global pool for `T`.
pub unsafe fn free_unchecked<T: GlobalPool>(ptr: Option<NonNull<T>>) {
    // SAFETY: Forwarding the guarantees from our caller.
    unsafe {
        T::global_pool().deallocate_unchecked(ptr);
    }
}

/// Takes a snapshot of slot usage in the global pool for `T`. See [`FixedPool::stats()`].
///
/// Creates the pool if nothing has used it yet.
#[must_use]
pub fn pool_stats<T: GlobalPool>() -> PoolStats {
    T::global_pool().stats()
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::thread;

    use super::*;

    struct Widget {
        id: u32,
    }

    crate::global_pool!(Widget, 3);

    struct Gadget(String);

    crate::global_pool!(Gadget, 2,);

    struct Shared(usize);

    crate::global_pool!(Shared, 16);

    // Each test uses its own type because the global pools are shared by all tests in the binary.

    #[test]
    fn global_pool_is_created_once() {
        let first: *const FixedPool<Widget> = Widget::global_pool();
        let second: *const FixedPool<Widget> = Widget::global_pool();

        assert_eq!(first, second);
        assert_eq!(pool_stats::<Widget>().total(), 3);

        let widget = alloc_checked(Widget { id: 7 }).unwrap();
        assert_eq!(widget.id, 7);
    }

    #[test]
    fn allocate_and_free_by_type() {
        let checked = alloc_checked(Gadget("checked".to_string())).unwrap();
        let unchecked = alloc_unchecked(Gadget("unchecked".to_string())).unwrap();

        assert_eq!(checked.0, "checked");
        assert_eq!(unsafe { unchecked.as_ref() }.0, "unchecked");
        assert_eq!(pool_stats::<Gadget>().used(), 2);

        // Capacity is 2, so this is rejected.
        assert!(alloc_checked(Gadget("rejected".to_string())).is_none());
        assert!(
            alloc_unchecked_with::<Gadget, _, ()>(|| Ok(Gadget("lazy".to_string())))
                .unwrap()
                .is_none()
        );

        drop(checked);
        unsafe { free_unchecked(Some(unchecked)) };
        unsafe { free_unchecked::<Gadget>(None) };

        assert_eq!(pool_stats::<Gadget>().used(), 0);

        assert!(alloc_checked_with(|| Err::<Gadget, _>("nope")).is_none());
        assert!(alloc_unchecked_with(|| Err::<Gadget, _>("nope")).is_err());
        assert_eq!(pool_stats::<Gadget>().used(), 0);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Too slow under Miri.
    fn global_pool_is_shared_by_threads() {
        thread::scope(|s| {
            for thread_index in 0..4 {
                s.spawn(move || {
                    for _ in 0..100 {
                        if let Some(item) = alloc_checked(Shared(thread_index)) {
                            assert_eq!(item.0, thread_index);
                        }
                    }
                });
            }
        });

        assert_eq!(pool_stats::<Shared>().used(), 0);
    }
}
