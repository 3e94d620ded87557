/// Determines what happens to items that are still in the pool when the pool is dropped.
///
/// Items allocated through [`FixedPool::allocate_checked()`][crate::FixedPool::allocate_checked]
/// borrow the pool and therefore can never outlive it. Items allocated through the raw
/// [`FixedPool::allocate_unchecked()`][crate::FixedPool::allocate_unchecked] API are not tracked
/// by the borrow checker, so a pool may be dropped while some of them were never deallocated.
///
/// By default, the pool drops such leftover items when it is dropped.
///
/// # Examples
///
/// ```
/// use fixed_pool::{DropPolicy, FixedPool};
/// use new_zealand::nz;
///
/// let pool = FixedPool::<u32>::builder()
///     .capacity(nz!(16))
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool will drop any remaining items when the pool is dropped. This is the default.
    #[default]
    MayDropItems,

    /// The pool will panic if it still contains items when it is dropped.
    ///
    /// This may be valuable to catch leaks of raw allocations, where every
    /// `allocate_unchecked()` is expected to be paired with a `deallocate_unchecked()`.
    MustNotDropItems,
}
