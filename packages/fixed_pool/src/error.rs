use thiserror::Error;

/// Errors that can occur when working with a [`PoolRegistry`][crate::PoolRegistry].
///
/// Allocation itself never produces this error: an exhausted pool is signaled with `None` and a
/// failing item initializer reports its own error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The registry has no pool for the requested item type.
    #[error("no pool is registered for items of type {type_name}")]
    NotRegistered {
        /// Name of the item type that was looked up.
        type_name: &'static str,
    },

    /// A pool for the item type was already registered. Each item type has at most one pool.
    #[error("a pool is already registered for items of type {type_name}")]
    AlreadyRegistered {
        /// Name of the item type that was registered twice.
        type_name: &'static str,
    },
}

/// A specialized `Result` type for registry operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, std::error::Error);

    #[test]
    fn messages_name_the_type() {
        let not_registered = Error::NotRegistered { type_name: "Foo" };
        let already_registered = Error::AlreadyRegistered { type_name: "Bar" };

        assert_eq!(
            not_registered.to_string(),
            "no pool is registered for items of type Foo"
        );
        assert_eq!(
            already_registered.to_string(),
            "a pool is already registered for items of type Bar"
        );
    }
}
