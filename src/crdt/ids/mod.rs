//! The identifier algebra: tuples, identifiers, intervals, and generation.
//!
//! Everything here is an immutable value type; identifiers may be freely
//! shared between replicas and between components within a replica.

pub mod factory;
pub mod identifier;
pub mod interval;
pub mod tuple;

// Re-export the main public API
pub use factory::create_between;
pub use identifier::Identifier;
pub use interval::IdentifierInterval;
pub use tuple::{IdentifierTuple, INT32_BOTTOM, INT32_TOP, MAX_TUPLE, MIN_TUPLE};
