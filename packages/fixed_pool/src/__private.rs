//! This module contains logically private things that must be technically public
//! because they are accessed from macro-generated code.

/// Re-export so we can use it via macros in projects that do not have a reference to
/// `new_zealand`.
pub use ::new_zealand::nz;
