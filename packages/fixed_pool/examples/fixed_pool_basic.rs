//! Basic usage example for `FixedPool`.
//!
//! Shows both allocation styles, what happens when the pool runs out of slots and how an
//! initializer failure is reported.

use std::num::ParseIntError;

use fixed_pool::FixedPool;
use new_zealand::nz;

#[derive(Debug)]
struct Order {
    id: u64,
    quantity: u32,
}

fn main() {
    // The pool events are emitted at debug level.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let pool = FixedPool::<Order>::new(nz!(3));

    println!("Created pool: {}", pool.stats());

    // Checked allocation hands out owning handles.
    let first = pool.allocate_checked(Order { id: 1, quantity: 10 }).unwrap();
    let mut second = pool.allocate_checked(Order { id: 2, quantity: 20 }).unwrap();

    second.quantity += 1;

    println!("First: {:?}", *first);
    println!("Second: {:?}", *second);

    // Unchecked allocation hands out raw pointers.
    let third = pool.allocate_unchecked(Order { id: 3, quantity: 30 }).unwrap();

    // SAFETY: The item is live until we deallocate it below.
    println!("Third: {:?}", unsafe { third.as_ref() });
    println!("After three allocations: {}", pool.stats());

    // There are only three slots.
    let fourth = pool.allocate_checked(Order { id: 4, quantity: 40 });
    println!("Fourth allocation succeeded: {}", fourth.is_some());

    // Returning any item makes room again.
    drop(first);

    // SAFETY: The pointer came from this pool and is not used after this.
    unsafe {
        pool.deallocate_unchecked(Some(third));
    }

    println!("After returning two items: {}", pool.stats());

    // A failing initializer does not consume a slot.
    let parsed: Result<Option<_>, ParseIntError> = pool.allocate_unchecked_with(|| {
        Ok(Order {
            id: "not a number".parse()?,
            quantity: 1,
        })
    });

    match parsed {
        Ok(_) => println!("Unexpectedly parsed the order id"),
        Err(e) => println!("Initializer failed: {e}"),
    }

    println!("Final: {}", pool.stats());
}
