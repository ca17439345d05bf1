//! Position identifiers: nonempty sequences of tuples with a total order.
//!
//! Identifiers order the elements of the replicated sequence. The order is
//! lexicographic on the tuple sequence, with a strict prefix sorting before
//! any of its extensions, so the space is dense: between any two distinct
//! identifiers a third can always be generated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crdt::ids::tuple::IdentifierTuple;

/// A position identifier.
///
/// Immutable once constructed. The derived `Ord` on the inner `Vec` is
/// exactly the required order: lexicographic by tuple, shorter-is-smaller
/// when one sequence is a prefix of the other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier {
    tuples: Vec<IdentifierTuple>,
}

impl Identifier {
    /// Creates an identifier from a nonempty tuple sequence.
    pub fn new(tuples: Vec<IdentifierTuple>) -> Self {
        debug_assert!(!tuples.is_empty(), "identifiers must hold at least one tuple");
        Identifier { tuples }
    }

    /// Creates a single-tuple identifier.
    pub fn from_tuple(tuple: IdentifierTuple) -> Self {
        Identifier {
            tuples: vec![tuple],
        }
    }

    /// Creates an identifier with the same base as `id` but a different
    /// final offset.
    pub fn from_base(id: &Identifier, offset: i32) -> Self {
        let mut tuples = id.tuples.clone();
        let last = tuples.last_mut().unwrap();
        *last = last.with_offset(offset);
        Identifier { tuples }
    }

    /// The tuple sequence.
    pub fn tuples(&self) -> &[IdentifierTuple] {
        &self.tuples
    }

    /// Number of tuples.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// The first tuple.
    pub fn head(&self) -> &IdentifierTuple {
        &self.tuples[0]
    }

    /// The offset of the final tuple.
    pub fn last_offset(&self) -> i32 {
        self.tuples.last().unwrap().offset
    }

    /// Returns true if both identifiers have the same length, agree on every
    /// tuple but the last, and their last tuples share a base. Two such
    /// identifiers belong to the same run and differ only by final offset.
    pub fn equals_base(&self, other: &Identifier) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let n = self.len();
        self.tuples[..n - 1] == other.tuples[..n - 1]
            && self.tuples[n - 1].equals_base(&other.tuples[n - 1])
    }

    /// Returns true if `self` is a prefix of `other` (inclusive: every
    /// identifier is a prefix of itself).
    pub fn is_prefix_of(&self, other: &Identifier) -> bool {
        self.len() <= other.len() && self.tuples[..] == other.tuples[..self.len()]
    }

    /// Splits the identifier after `k` tuples into `(head, tail)`.
    ///
    /// Returns `None` when `k` is zero (the head would be empty) or greater
    /// than the identifier length.
    pub fn truncate(&self, k: usize) -> Option<(Identifier, Vec<IdentifierTuple>)> {
        if k == 0 || k > self.len() {
            return None;
        }
        let head = Identifier::new(self.tuples[..k].to_vec());
        let tail = self.tuples[k..].to_vec();
        Some((head, tail))
    }

    /// The tuples from index `k` on.
    pub fn tail_from(&self, k: usize) -> &[IdentifierTuple] {
        &self.tuples[k..]
    }

    /// Concatenation of the two tuple sequences. Used to build descendants:
    /// `concat(a, b)` sorts strictly after `a` and before any identifier
    /// whose prefix exceeds `a`.
    pub fn concat(&self, other: &Identifier) -> Identifier {
        let mut tuples = Vec::with_capacity(self.len() + other.len());
        tuples.extend_from_slice(&self.tuples);
        tuples.extend_from_slice(&other.tuples);
        Identifier { tuples }
    }

    /// Concatenation with a raw tuple slice (which may be empty).
    pub fn concat_tuples(&self, tail: &[IdentifierTuple]) -> Identifier {
        let mut tuples = Vec::with_capacity(self.len() + tail.len());
        tuples.extend_from_slice(&self.tuples);
        tuples.extend_from_slice(tail);
        Identifier { tuples }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, t) in self.tuples.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "[{},{},{},{}]", t.random, t.replica_number, t.clock, t.offset)?;
        }
        Ok(())
    }
}
