use std::any::{Any, TypeId, type_name};
use std::collections::hash_map::Entry;
use std::fmt;
use std::num::NonZero;
use std::ptr::NonNull;

use foldhash::{HashMap, HashMapExt};
use tracing::debug;

use crate::{Error, FixedPool, PoolStats, Pooled, Result};

type ErasedPool = Box<dyn Any + Send + Sync>;

/// A fixed set of [`FixedPool`]s, one per item type, looked up by item type alone.
///
/// The set of pools is decided when the registry is built and never changes afterwards, so
/// looking up a pool does not involve any synchronization. Share the registry by reference
/// (or wrap it in an `Arc` or a static) with whoever needs to allocate.
///
/// For a process-wide pool per type without passing a registry around, see
/// [`global_pool!`][crate::global_pool].
///
/// # Example
///
/// ```
/// use fixed_pool::PoolRegistry;
/// use new_zealand::nz;
///
/// struct Order {
///     id: u64,
/// }
///
/// let registry = PoolRegistry::builder()
///     .register::<Order>(nz!(1000))?
///     .register::<String>(nz!(100))?
///     .build();
///
/// let order = registry.alloc_checked(Order { id: 42 })?.unwrap();
/// assert_eq!(order.id, 42);
///
/// assert_eq!(registry.stats::<Order>()?.used(), 1);
/// assert_eq!(registry.stats::<String>()?.used(), 0);
///
/// // Types without a registered pool are rejected.
/// assert!(registry.alloc_checked(42_u8).is_err());
/// # Ok::<(), fixed_pool::Error>(())
/// ```
pub struct PoolRegistry {
    pools: HashMap<TypeId, ErasedPool>,
}

impl PoolRegistry {
    /// Starts building a new [`PoolRegistry`].
    pub fn builder() -> PoolRegistryBuilder {
        PoolRegistryBuilder::new()
    }

    /// The number of item types with a registered pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether the registry has no pools at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// The pool registered for items of type `T`.
    ///
    /// Use this to reach the operations not mirrored on the registry itself, such as
    /// [`FixedPool::allocate_checked_with()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRegistered`] if no pool is registered for `T`.
    pub fn pool<T: Send + 'static>(&self) -> Result<&FixedPool<T>> {
        self.pools
            .get(&TypeId::of::<T>())
            .and_then(|pool| pool.downcast_ref::<FixedPool<T>>())
            .ok_or(Error::NotRegistered {
                type_name: type_name::<T>(),
            })
    }

    /// Moves `value` into the pool for `T`. See [`FixedPool::allocate_checked()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRegistered`] if no pool is registered for `T`. An exhausted pool is
    /// not an error but `Ok(None)`.
    pub fn alloc_checked<T: Send + 'static>(&self, value: T) -> Result<Option<Pooled<'_, T>>> {
        Ok(self.pool::<T>()?.allocate_checked(value))
    }

    /// Creates an item in the pool for `T` using `init`. See
    /// [`FixedPool::allocate_checked_with()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRegistered`] if no pool is registered for `T`. An exhausted pool or a
    /// failing `init` is not an error but `Ok(None)`.
    pub fn alloc_checked_with<T, F, E>(&self, init: F) -> Result<Option<Pooled<'_, T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        Ok(self.pool::<T>()?.allocate_checked_with(init))
    }

    /// Moves `value` into the pool for `T`. See [`FixedPool::allocate_unchecked()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRegistered`] if no pool is registered for `T`. An exhausted pool is
    /// not an error but `Ok(None)`.
    pub fn alloc_unchecked<T: Send + 'static>(&self, value: T) -> Result<Option<NonNull<T>>> {
        Ok(self.pool::<T>()?.allocate_unchecked(value))
    }

    /// Creates an item in the pool for `T` using `init`, returning a raw pointer to it. See
    /// [`FixedPool::allocate_unchecked_with()`].
    ///
    /// The outer `Result` reports whether `T` has a pool at all. The inner one carries the
    /// outcome of the allocation itself, including the error from `init` if it fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRegistered`] if no pool is registered for `T`.
    ///
    /// # Panics
    ///
    /// Propagates any panic from `init`. The claimed slot is returned to the pool before that.
    pub fn alloc_unchecked_with<T, F, E>(
        &self,
        init: F,
    ) -> Result<std::result::Result<Option<NonNull<T>>, E>>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        Ok(self.pool::<T>()?.allocate_unchecked_with(init))
    }

    /// Drops an item allocated via [`alloc_unchecked()`][Self::alloc_unchecked] or
    /// [`alloc_unchecked_with()`][Self::alloc_unchecked_with] and returns its slot to the pool
    /// for `T`. Does nothing if `ptr` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRegistered`] if no pool is registered for `T`.
    ///
    /// # Safety
    ///
    /// Same as [`FixedPool::deallocate_unchecked()`], with "this pool" being the pool that this
    /// registry holds for `T`.
    pub unsafe fn free_unchecked<T: Send + 'static>(&self, ptr: Option<NonNull<T>>) -> Result<()> {
        let pool = self.pool::<T>()?;

        // SAFETY: Forwarding the guarantees from our caller.
        unsafe {
            pool.deallocate_unchecked(ptr);
        }

        Ok(())
    }

    /// Takes a snapshot of slot usage in the pool for `T`. See [`FixedPool::stats()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRegistered`] if no pool is registered for `T`.
    pub fn stats<T: Send + 'static>(&self) -> Result<PoolStats> {
        Ok(self.pool::<T>()?.stats())
    }
}

impl fmt::Debug for PoolRegistry {
    #[cfg_attr(test, mutants::skip)] // Diagnostics only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pool_count", &self.pools.len())
            .finish_non_exhaustive()
    }
}

/// Builder for creating an instance of [`PoolRegistry`].
///
/// Each item type can be registered once. The registry is immutable once built.
#[must_use]
pub struct PoolRegistryBuilder {
    pools: HashMap<TypeId, ErasedPool>,
}

impl PoolRegistryBuilder {
    pub(crate) fn new() -> Self {
        Self {
            pools: HashMap::new(),
        }
    }

    /// Registers a pool with room for `capacity` items of type `T`, using the default pool
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRegistered`] if a pool for `T` was already registered.
    pub fn register<T: Send + 'static>(self, capacity: NonZero<usize>) -> Result<Self> {
        self.register_pool(FixedPool::<T>::new(capacity))
    }

    /// Registers an already created pool for items of type `T`. Use this if the pool needs a
    /// configuration other than the default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRegistered`] if a pool for `T` was already registered. The
    /// rejected pool is dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use fixed_pool::{DropPolicy, FixedPool, PoolRegistry};
    /// use new_zealand::nz;
    ///
    /// let strict = FixedPool::<u64>::builder()
    ///     .capacity(nz!(16))
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    ///
    /// let registry = PoolRegistry::builder().register_pool(strict)?.build();
    ///
    /// assert_eq!(
    ///     registry.pool::<u64>()?.drop_policy(),
    ///     DropPolicy::MustNotDropItems
    /// );
    /// # Ok::<(), fixed_pool::Error>(())
    /// ```
    pub fn register_pool<T: Send + 'static>(mut self, pool: FixedPool<T>) -> Result<Self> {
        match self.pools.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => Err(Error::AlreadyRegistered {
                type_name: type_name::<T>(),
            }),
            Entry::Vacant(entry) => {
                debug!(
                    item_type = type_name::<T>(),
                    capacity = pool.capacity().get(),
                    "registered fixed pool"
                );

                entry.insert(Box::new(pool));
                Ok(self)
            }
        }
    }

    /// Builds the registry. No more pools can be registered after this.
    #[must_use]
    pub fn build(self) -> PoolRegistry {
        PoolRegistry { pools: self.pools }
    }
}

impl fmt::Debug for PoolRegistryBuilder {
    #[cfg_attr(test, mutants::skip)] // Diagnostics only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistryBuilder")
            .field("pool_count", &self.pools.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(PoolRegistry: Send, Sync, fmt::Debug);
    assert_impl_all!(PoolRegistryBuilder: Send, fmt::Debug);

    #[derive(Debug, PartialEq)]
    struct Foo {
        value: i32,
        name: String,
    }

    #[derive(Debug, PartialEq)]
    struct Bar {
        counter: i32,
    }

    fn registry() -> PoolRegistry {
        PoolRegistry::builder()
            .register::<Foo>(nz!(10))
            .unwrap()
            .register::<Bar>(nz!(5))
            .unwrap()
            .build()
    }

    #[test]
    fn empty_registry() {
        let registry = PoolRegistry::builder().build();

        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(matches!(
            registry.pool::<Foo>(),
            Err(Error::NotRegistered { .. })
        ));
    }

    #[test]
    fn pools_have_registered_capacity() {
        let registry = registry();

        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
        assert_eq!(registry.stats::<Foo>().unwrap().total(), 10);
        assert_eq!(registry.stats::<Bar>().unwrap().total(), 5);
    }

    #[test]
    fn alloc_checked_by_type() {
        let registry = registry();

        let foo = registry
            .alloc_checked(Foo {
                value: 42,
                name: "registry".to_string(),
            })
            .unwrap()
            .unwrap();

        assert_eq!(foo.value, 42);
        assert_eq!(foo.name, "registry");
        assert_eq!(registry.stats::<Foo>().unwrap().used(), 1);
        assert_eq!(registry.stats::<Bar>().unwrap().used(), 0);

        drop(foo);
        assert_eq!(registry.stats::<Foo>().unwrap().used(), 0);
    }

    #[test]
    fn alloc_unchecked_and_free_by_type() {
        let registry = registry();

        let bar = registry.alloc_unchecked(Bar { counter: 5 }).unwrap().unwrap();
        assert_eq!(unsafe { bar.as_ref() }.counter, 5);
        assert_eq!(registry.stats::<Bar>().unwrap().used(), 1);

        unsafe { registry.free_unchecked(Some(bar)) }.unwrap();
        unsafe { registry.free_unchecked::<Bar>(None) }.unwrap();

        assert_eq!(registry.stats::<Bar>().unwrap().used(), 0);
    }

    #[test]
    fn alloc_with_initializer_by_type() {
        let registry = registry();

        let bar = registry
            .alloc_checked_with(|| Ok::<_, ()>(Bar { counter: 1 }))
            .unwrap()
            .unwrap();
        assert_eq!(bar.counter, 1);

        assert!(
            registry
                .alloc_checked_with(|| Err::<Bar, _>("failed"))
                .unwrap()
                .is_none()
        );

        let inner = registry
            .alloc_unchecked_with(|| Err::<Bar, _>("failed"))
            .unwrap();
        assert_eq!(inner, Err("failed"));

        let ptr = registry
            .alloc_unchecked_with(|| Ok::<_, ()>(Bar { counter: 2 }))
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(unsafe { ptr.as_ref() }.counter, 2);
        assert_eq!(registry.stats::<Bar>().unwrap().used(), 2);

        unsafe { registry.free_unchecked(Some(ptr)) }.unwrap();
        drop(bar);

        assert_eq!(registry.stats::<Bar>().unwrap().used(), 0);
        assert!(registry.alloc_unchecked_with(|| Ok::<_, ()>(0_u8)).is_err());
    }

    #[test]
    fn unregistered_type_is_error() {
        let registry = registry();

        assert!(matches!(
            registry.alloc_checked(1_u32),
            Err(Error::NotRegistered { type_name }) if type_name == "u32"
        ));
        assert!(registry.alloc_unchecked(1_u32).is_err());
        assert!(unsafe { registry.free_unchecked::<u32>(None) }.is_err());
        assert!(registry.stats::<u32>().is_err());
    }

    #[test]
    fn duplicate_registration_is_error() {
        let result = PoolRegistry::builder()
            .register::<Foo>(nz!(1))
            .unwrap()
            .register::<Foo>(nz!(2));

        assert!(matches!(result, Err(Error::AlreadyRegistered { .. })));
    }

    #[test]
    fn exhausted_pool_is_not_error() {
        let registry = PoolRegistry::builder()
            .register::<Bar>(nz!(1))
            .unwrap()
            .build();

        let _first = registry.alloc_checked(Bar { counter: 1 }).unwrap().unwrap();

        assert!(registry.alloc_checked(Bar { counter: 2 }).unwrap().is_none());
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Too slow under Miri.
    fn shared_between_threads() {
        let registry = Arc::new(registry());

        let threads: Vec<_> = (0..4)
            .map(|thread_index| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..100 {
                        if let Some(bar) = registry.alloc_checked(Bar { counter: i }).unwrap() {
                            assert_eq!(bar.counter, i);
                        }

                        if let Some(foo) = registry
                            .alloc_checked(Foo {
                                value: thread_index,
                                name: format!("thread_{thread_index}"),
                            })
                            .unwrap()
                        {
                            assert_eq!(foo.value, thread_index);
                        }
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(registry.stats::<Foo>().unwrap().used(), 0);
        assert_eq!(registry.stats::<Bar>().unwrap().used(), 0);
    }
}
