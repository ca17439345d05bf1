//! Identifier tuple: one level of a position identifier.
//!
//! A tuple is the atom of the dense identifier space. Identifiers are
//! sequences of tuples, and the total order over tuples (lexicographic on
//! `(random, replica_number, clock, offset)`) induces the total order over
//! identifiers.

use serde::{Deserialize, Serialize};

/// Largest value an identifier field may take.
pub const INT32_TOP: i32 = i32::MAX;

/// Smallest value an identifier field may take.
pub const INT32_BOTTOM: i32 = i32::MIN;

/// One level of a position identifier.
///
/// Two tuples *share a base* when `random`, `replica_number` and `clock` are
/// all equal; such tuples differ only by `offset` and belong to the same run
/// of consecutive identifiers.
///
/// # Ordering
///
/// Tuples are ordered lexicographically on
/// `(random, replica_number, clock, offset)`, which the derived `Ord`
/// provides through the field declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifierTuple {
    /// Random component anchoring the tuple in the dense space
    pub random: i32,
    /// The replica that generated this tuple
    pub replica_number: i32,
    /// The replica's logical clock value at generation time
    pub clock: i32,
    /// Offset within a run of consecutive identifiers
    pub offset: i32,
}

/// Sentinel tuple below every generated tuple. Used to pad the shorter
/// identifier during generation.
pub const MIN_TUPLE: IdentifierTuple = IdentifierTuple {
    random: INT32_BOTTOM,
    replica_number: 0,
    clock: 0,
    offset: 0,
};

/// Sentinel tuple above every generated tuple.
pub const MAX_TUPLE: IdentifierTuple = IdentifierTuple {
    random: INT32_TOP,
    replica_number: 0,
    clock: 0,
    offset: 0,
};

impl IdentifierTuple {
    /// Creates a new tuple.
    pub fn new(random: i32, replica_number: i32, clock: i32, offset: i32) -> Self {
        IdentifierTuple {
            random,
            replica_number,
            clock,
            offset,
        }
    }

    /// Returns a copy of this tuple with a different offset.
    pub fn with_offset(&self, offset: i32) -> Self {
        IdentifierTuple { offset, ..*self }
    }

    /// Returns true if both tuples share `(random, replica_number, clock)`.
    pub fn equals_base(&self, other: &IdentifierTuple) -> bool {
        self.random == other.random
            && self.replica_number == other.replica_number
            && self.clock == other.clock
    }
}
