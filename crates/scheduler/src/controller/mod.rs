//! Controller -- the per-round arbitration loop.
//!
//! Split into focused submodules:
//! - `core`: Controller struct, constructor, handles and accessors
//! - `round`: one decision round, steps 0 through 6
//! - `lifecycle`: withdraw, drain, security reset and the async driver

mod core;
mod lifecycle;
mod round;
#[cfg(test)]
mod tests;

pub use self::core::Controller;
pub use self::round::{Assignment, PolicySwitch, RoundReport};
