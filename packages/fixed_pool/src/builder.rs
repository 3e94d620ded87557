use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{DropPolicy, FixedPool};

/// Builder for creating an instance of [`FixedPool`].
///
/// The capacity is mandatory. Everything else falls back to the same defaults that
/// [`FixedPool::new()`][1] uses.
///
/// # Examples
///
/// ```
/// use fixed_pool::{DropPolicy, FixedPool};
/// use new_zealand::nz;
///
/// let pool = FixedPool::<u32>::builder()
///     .capacity(nz!(1000))
///     .drop_policy(DropPolicy::MayDropItems)
///     .build();
///
/// assert_eq!(pool.capacity().get(), 1000);
/// ```
///
/// [1]: FixedPool::new
#[must_use]
pub struct FixedPoolBuilder<T> {
    capacity: Option<NonZero<usize>>,
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
}

impl<T> fmt::Debug for FixedPoolBuilder<T> {
    #[cfg_attr(test, mutants::skip)] // Diagnostics only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("capacity", &self.capacity)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T> FixedPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            capacity: None,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets the number of items the pool can hold at the same time.
    ///
    /// All the storage is allocated when the pool is built and the capacity never changes after
    /// that.
    pub fn capacity(mut self, capacity: NonZero<usize>) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining items in the pool when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::{DropPolicy, FixedPool};
    /// use new_zealand::nz;
    ///
    /// let pool = FixedPool::<u32>::builder()
    ///     .capacity(nz!(8))
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    /// ```
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration, allocating storage for all its items.
    ///
    /// # Panics
    ///
    /// Panics if no capacity has been set using [`capacity()`](Self::capacity).
    #[must_use]
    pub fn build(self) -> FixedPool<T> {
        let capacity = self
            .capacity
            .expect("capacity must be set using .capacity() before calling .build()");

        FixedPool::new_inner(capacity, self.drop_policy)
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(FixedPoolBuilder<u32>: Send, Sync, fmt::Debug);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = FixedPoolBuilder::<u32>::new();

        assert!(builder.capacity.is_none());
        assert_eq!(builder.drop_policy, DropPolicy::default());
    }

    #[test]
    fn builder_applies_configuration() {
        let pool = FixedPool::<String>::builder()
            .capacity(nz!(7))
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        assert_eq!(pool.capacity().get(), 7);
        assert_eq!(pool.drop_policy(), DropPolicy::MustNotDropItems);
        assert_eq!(pool.stats().free(), 7);
    }

    #[test]
    fn later_setting_wins() {
        let pool = FixedPool::<u8>::builder()
            .capacity(nz!(2))
            .capacity(nz!(3))
            .build();

        assert_eq!(pool.capacity().get(), 3);
    }

    #[test]
    #[should_panic]
    fn build_without_capacity_panics() {
        drop(FixedPool::<u32>::builder().build());
    }
}
