//! Identifier intervals: contiguous runs of consecutive identifiers.
//!
//! An interval `(base, begin, end)` denotes every identifier that shares the
//! base (all tuples but the final offset) with offsets `begin..=end`. Runs
//! are how consecutive insertions are shipped and stored without per-element
//! metadata.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crdt::ids::identifier::Identifier;
use crate::crdt::ids::tuple::IdentifierTuple;

/// A contiguous run `[begin..=end]` of identifiers sharing a common base.
///
/// Stored as the identifier of the first element plus the final offset; the
/// wire form is `{ base, begin, end }` (see [`Serialize`] below).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentifierInterval {
    id_begin: Identifier,
    end: i32,
}

/// Wire shape of an interval, per the operation payload contract.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInterval {
    base: Vec<IdentifierTuple>,
    begin: i32,
    end: i32,
}

impl IdentifierInterval {
    /// Creates the interval `[id_begin ..= id_begin with offset end]`.
    pub fn new(id_begin: Identifier, end: i32) -> Self {
        debug_assert!(id_begin.last_offset() <= end, "interval must not be empty");
        IdentifierInterval { id_begin, end }
    }

    /// First offset of the run.
    pub fn begin(&self) -> i32 {
        self.id_begin.last_offset()
    }

    /// Last offset of the run.
    pub fn end(&self) -> i32 {
        self.end
    }

    /// Number of identifiers in the run.
    pub fn length(&self) -> usize {
        (self.end as i64 - self.begin() as i64 + 1) as usize
    }

    /// Identifier of the first element.
    pub fn min_id(&self) -> &Identifier {
        &self.id_begin
    }

    /// Identifier of the last element.
    pub fn max_id(&self) -> Identifier {
        Identifier::from_base(&self.id_begin, self.end)
    }

    /// Identifier at the given offset. The offset must lie in
    /// `begin()..=end()` for the result to be a member of the run.
    pub fn id_at(&self, offset: i32) -> Identifier {
        Identifier::from_base(&self.id_begin, offset)
    }

    /// Returns true if both intervals share the same base.
    pub fn equals_base(&self, other: &IdentifierInterval) -> bool {
        self.id_begin.equals_base(other.min_id())
    }

    /// Returns true if `offset` falls within the run.
    pub fn contains(&self, offset: i32) -> bool {
        self.begin() <= offset && offset <= self.end
    }

    /// Smallest contiguous interval containing this run and `[begin..=end]`.
    ///
    /// The added offsets must overlap or abut the run; intervals never grow
    /// discontinuously.
    pub fn union(&self, begin: i32, end: i32) -> IdentifierInterval {
        debug_assert!(
            begin as i64 <= self.end as i64 + 1 && self.begin() as i64 <= end as i64 + 1,
            "union requires overlapping or abutting offsets"
        );
        let new_begin = self.begin().min(begin);
        let new_end = self.end.max(end);
        IdentifierInterval {
            id_begin: self.id_at(new_begin),
            end: new_end,
        }
    }

    /// The sub-run `[begin..=end]` of this interval.
    pub fn sub(&self, begin: i32, end: i32) -> IdentifierInterval {
        debug_assert!(self.contains(begin) && self.contains(end) && begin <= end);
        IdentifierInterval {
            id_begin: self.id_at(begin),
            end,
        }
    }

    /// Iterates the member identifiers in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = Identifier> + '_ {
        (self.begin()..=self.end).map(move |o| self.id_at(o))
    }
}

impl Serialize for IdentifierInterval {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawInterval {
            base: self.id_begin.tuples().to_vec(),
            begin: self.begin(),
            end: self.end,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IdentifierInterval {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawInterval::deserialize(deserializer)?;
        if raw.base.is_empty() {
            return Err(serde::de::Error::custom("interval base must not be empty"));
        }
        if raw.begin > raw.end {
            return Err(serde::de::Error::custom("interval begin exceeds end"));
        }
        let mut tuples = raw.base;
        let last = tuples.last_mut().unwrap();
        *last = last.with_offset(raw.begin);
        Ok(IdentifierInterval {
            id_begin: Identifier::new(tuples),
            end: raw.end,
        })
    }
}

impl fmt::Display for IdentifierInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.id_begin, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(random: i32, replica: i32, clock: i32, begin: i32, end: i32) -> IdentifierInterval {
        IdentifierInterval::new(
            Identifier::from_tuple(IdentifierTuple::new(random, replica, clock, begin)),
            end,
        )
    }

    #[test]
    fn test_length_and_bounds() {
        let iv = interval(10, 1, 0, 2, 5);
        assert_eq!(iv.length(), 4);
        assert_eq!(iv.begin(), 2);
        assert_eq!(iv.end(), 5);
        assert_eq!(iv.min_id().last_offset(), 2);
        assert_eq!(iv.max_id().last_offset(), 5);
    }

    #[test]
    fn test_union_extends_both_ways() {
        let iv = interval(10, 1, 0, 2, 5);

        let grown = iv.union(6, 9);
        assert_eq!(grown.begin(), 2);
        assert_eq!(grown.end(), 9);

        let grown = iv.union(0, 1);
        assert_eq!(grown.begin(), 0);
        assert_eq!(grown.end(), 5);
    }

    #[test]
    fn test_ids_are_ascending_members() {
        let iv = interval(10, 1, 0, 0, 3);
        let ids: Vec<_> = iv.ids().collect();
        assert_eq!(ids.len(), 4);
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].equals_base(&pair[1]));
        }
    }

    #[test]
    fn test_wire_round_trip() {
        let iv = interval(10, 1, 7, 2, 5);
        let json = serde_json::to_string(&iv).unwrap();
        assert!(json.contains("\"begin\":2"));
        assert!(json.contains("\"end\":5"));
        let back: IdentifierInterval = serde_json::from_str(&json).unwrap();
        assert_eq!(back, iv);
    }

    #[test]
    fn test_wire_rejects_malformed() {
        // begin > end
        assert!(serde_json::from_str::<IdentifierInterval>(
            r#"{"base":[{"random":1,"replicaNumber":0,"clock":0,"offset":4}],"begin":4,"end":2}"#
        )
        .is_err());
        // empty base
        assert!(serde_json::from_str::<IdentifierInterval>(
            r#"{"base":[],"begin":0,"end":2}"#
        )
        .is_err());
        // base not an array
        assert!(serde_json::from_str::<IdentifierInterval>(
            r#"{"base":3,"begin":0,"end":2}"#
        )
        .is_err());
        // field outside the int32 range
        assert!(serde_json::from_str::<IdentifierInterval>(
            r#"{"base":[{"random":3000000000,"replicaNumber":0,"clock":0,"offset":0}],"begin":0,"end":2}"#
        )
        .is_err());
    }
}
