#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A lock-free object pool with a fixed number of slots, for allocating objects of one type from
//! any number of threads without touching the heap.
//!
//! This is part of the [Folo project](https://github.com/folo-rs/folo) that provides mechanisms for
//! high-performance hardware-aware programming in Rust.
//!
//! All storage of a [`FixedPool`] is allocated when the pool is created. Allocating an item claims
//! a free slot with a single atomic compare-and-swap and deallocating it marks the slot free
//! again. No operation ever blocks or waits for another thread: when every slot is occupied, the
//! allocation simply returns `None`.
//!
//! # Allocation styles
//!
//! * **Checked** allocation returns a [`Pooled`] handle that owns the item and returns it to the
//!   pool when dropped. Initializer errors and panics are contained and reported as `None`.
//! * **Unchecked** allocation returns a raw pointer. The caller is responsible for returning it
//!   via [`FixedPool::deallocate_unchecked()`] and is told about initializer errors.
//!
//! # Example
//!
//! ```
//! use fixed_pool::FixedPool;
//! use new_zealand::nz;
//!
//! #[derive(Debug)]
//! struct Order {
//!     id: u64,
//!     quantity: u32,
//! }
//!
//! let pool = FixedPool::<Order>::new(nz!(1024));
//!
//! let mut order = pool
//!     .allocate_checked(Order {
//!         id: 1,
//!         quantity: 10,
//!     })
//!     .unwrap();
//!
//! order.quantity += 5;
//! assert_eq!(order.quantity, 15);
//!
//! // Dropping the handle returns the slot to the pool.
//! drop(order);
//! assert_eq!(pool.stats().used(), 0);
//! ```
//!
//! # Pools by type
//!
//! When different parts of a program need to allocate the same type without passing a pool
//! around, a pool can be looked up by item type instead:
//!
//! * [`PoolRegistry`] holds one pool per registered item type, decided up front when the
//!   registry is built.
//! * [`global_pool!`] gives an item type a process-wide pool, used via free functions such as
//!   [`alloc_checked()`] and [`pool_stats()`].
//!
//! ```
//! use fixed_pool::{alloc_checked, global_pool, pool_stats};
//!
//! struct Message {
//!     text: String,
//! }
//!
//! global_pool!(Message, 256);
//!
//! let message = alloc_checked(Message {
//!     text: "hello".to_string(),
//! })
//! .unwrap();
//!
//! assert_eq!(message.text, "hello");
//! assert_eq!(pool_stats::<Message>().used(), 1);
//! ```
//!
//! # Thread safety
//!
//! The pool is [`Sync`] if `T` is [`Send`]: items may be created on one thread and dropped on
//! another. [`Pooled`] handles are [`Send`] if `T` is [`Send`] and [`Sync`] if `T` is [`Sync`].
//!
//! # Diagnostics
//!
//! The pool emits `tracing` events when it is created, when an allocation finds the pool
//! exhausted and when a checked allocation swallows an initializer failure. Install a
//! `tracing` subscriber to see them.

#[doc(hidden)]
pub mod __private;

mod builder;
mod drop_policy;
mod error;
mod global;
mod pool;
mod pooled;
mod registry;
mod slot;
mod stats;

pub use builder::*;
pub use drop_policy::*;
pub use error::*;
pub use global::*;
pub use pool::FixedPool;
pub use pooled::Pooled;
pub use registry::*;
pub(crate) use slot::*;
pub use stats::PoolStats;
