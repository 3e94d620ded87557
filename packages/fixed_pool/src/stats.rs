use std::fmt;

/// A best-effort snapshot of slot usage in a [`FixedPool`][crate::FixedPool].
///
/// Returned by [`FixedPool::stats()`][crate::FixedPool::stats]. The slots are inspected one at
/// a time, so when other threads are allocating or deallocating at the same time the numbers
/// describe no single moment in time. `free() + used() == total()` always holds.
///
/// # Example
///
/// ```
/// use fixed_pool::FixedPool;
/// use new_zealand::nz;
///
/// let pool = FixedPool::<u32>::new(nz!(4));
/// let _item = pool.allocate_checked(1).unwrap();
///
/// println!("{}", pool.stats()); // 1/4 slots used (25.0%)
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolStats {
    total: usize,
    free: usize,
    used: usize,
}

impl PoolStats {
    #[must_use]
    pub(crate) fn new(total: usize, free: usize) -> Self {
        let used = total
            .checked_sub(free)
            .expect("cannot have more free slots than there are slots");

        Self { total, free, used }
    }

    /// Total number of slots in the pool, i.e. its capacity.
    #[must_use]
    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of slots that were free when inspected.
    #[must_use]
    #[inline]
    pub fn free(&self) -> usize {
        self.free
    }

    /// Number of slots that were occupied when inspected.
    #[must_use]
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Share of occupied slots, from 0.0 to 100.0.
    #[must_use]
    #[expect(
        clippy::cast_precision_loss,
        reason = "a percentage does not need the precision of the full integer range"
    )]
    pub fn utilization_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        self.used as f64 / self.total as f64 * 100.0
    }
}

impl fmt::Display for PoolStats {
    #[cfg_attr(test, mutants::skip)] // Diagnostics only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} slots used ({:.1}%)",
            self.used,
            self.total,
            self.utilization_percent()
        )
    }
}

#[cfg(test)]
#[allow(
    clippy::float_cmp,
    reason = "the values in these tests are exactly representable"
)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool() {
        let stats = PoolStats::new(10, 10);

        assert_eq!(stats.total(), 10);
        assert_eq!(stats.free(), 10);
        assert_eq!(stats.used(), 0);
        assert_eq!(stats.utilization_percent(), 0.0);
    }

    #[test]
    fn half_full_pool() {
        let stats = PoolStats::new(10, 5);

        assert_eq!(stats.used(), 5);
        assert_eq!(stats.utilization_percent(), 50.0);
    }

    #[test]
    fn full_pool() {
        let stats = PoolStats::new(4, 0);

        assert_eq!(stats.used(), 4);
        assert_eq!(stats.utilization_percent(), 100.0);
    }

    #[test]
    fn zero_total_has_zero_utilization() {
        assert_eq!(PoolStats::new(0, 0).utilization_percent(), 0.0);
    }

    #[test]
    fn display() {
        assert_eq!(PoolStats::new(4, 3).to_string(), "1/4 slots used (25.0%)");
    }

    #[test]
    #[should_panic]
    fn more_free_than_total_panics() {
        _ = PoolStats::new(1, 2);
    }
}
