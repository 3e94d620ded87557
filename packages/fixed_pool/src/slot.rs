use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

/// Storage for a single item of a [`FixedPool`][crate::FixedPool], together with the flag that
/// says whether the storage is up for grabs.
///
/// A slot is either free (storage uninitialized, `available == true`) or occupied (storage holds
/// a live item, `available == false`). Only the thread that won the claim on a slot may touch its
/// storage, until it releases the slot again.
///
/// The slot itself does not know whether its storage is initialized beyond what the flag says,
/// so it never drops the item on its own. The pool is responsible for that.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,

    available: AtomicBool,
}

/// Outcome of a single claim attempt on a [`Slot`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ClaimAttempt {
    /// The slot is now ours.
    Claimed,

    /// The compare-and-swap failed even though the slot still looked free. Worth another try.
    Spurious,

    /// Someone else is holding the slot.
    Occupied,
}

impl<T> Slot<T> {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            available: AtomicBool::new(true),
        }
    }

    /// Makes one attempt to transition the slot from free to occupied.
    pub(crate) fn try_claim(&self) -> ClaimAttempt {
        // Acquire on success pairs with the Release in `release()`, so everything the previous
        // occupant did to the storage (including dropping its item) happens-before whatever we
        // do with it next. Failure carries no data, so Relaxed is enough there.
        match self.available.compare_exchange_weak(
            true,
            false,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => ClaimAttempt::Claimed,
            Err(true) => ClaimAttempt::Spurious,
            Err(false) => ClaimAttempt::Occupied,
        }
    }

    /// Transitions the slot from occupied back to free.
    ///
    /// The caller must be the current claim holder and must have already dropped the item
    /// (or never written one).
    pub(crate) fn release(&self) {
        self.available.store(true, Ordering::Release);
    }

    /// Whether the slot was free at the moment of the check. Only a hint when other threads
    /// are operating on the pool at the same time.
    #[must_use]
    pub(crate) fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Pointer to the item storage. The pointer is valid for the lifetime of the slot but the
    /// storage is only initialized while the slot is occupied.
    #[must_use]
    pub(crate) fn value_ptr(&self) -> NonNull<T> {
        NonNull::new(self.value.get())
            .expect("UnsafeCell never hands out a null pointer")
            .cast::<T>()
    }

    /// Moves an item into the slot storage.
    ///
    /// # Safety
    ///
    /// The caller must hold the claim on the slot and the storage must not contain an item.
    pub(crate) unsafe fn write(&self, value: T) -> NonNull<T> {
        let ptr = self.value_ptr();

        // SAFETY: Holding the claim gives us exclusive access to the storage and the caller
        // guarantees there is no item there that we would be overwriting without dropping it.
        unsafe {
            ptr.write(value);
        }

        ptr
    }

    /// Drops the item in the slot storage in place, leaving the storage uninitialized.
    ///
    /// # Safety
    ///
    /// The caller must hold the claim on the slot, the storage must contain an item and nothing
    /// may reference that item anymore.
    pub(crate) unsafe fn drop_value(&self) {
        // SAFETY: Forwarding the guarantees from our caller.
        unsafe {
            self.value_ptr().drop_in_place();
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn starts_available() {
        let slot = Slot::<u64>::new();

        assert!(slot.is_available());
    }

    #[test]
    fn claim_then_release() {
        let slot = Slot::<u64>::new();

        // A weak CAS may fail spuriously, so we retry until it settles.
        let mut attempt = slot.try_claim();
        while attempt == ClaimAttempt::Spurious {
            attempt = slot.try_claim();
        }

        assert_eq!(attempt, ClaimAttempt::Claimed);
        assert!(!slot.is_available());
        assert_eq!(slot.try_claim(), ClaimAttempt::Occupied);

        slot.release();

        assert!(slot.is_available());
    }

    #[test]
    fn write_and_drop_value() {
        struct Tracked(Rc<Cell<usize>>);

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let slot = Slot::<Tracked>::new();

        while slot.try_claim() != ClaimAttempt::Claimed {}

        let ptr = unsafe { slot.write(Tracked(Rc::clone(&drops))) };
        assert_eq!(ptr, slot.value_ptr());
        assert_eq!(drops.get(), 0);

        unsafe { slot.drop_value() };
        slot.release();

        assert_eq!(drops.get(), 1);
        assert!(slot.is_available());
    }
}
