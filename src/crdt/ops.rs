//! Operation payloads exchanged between replicas, and the text operations
//! handed to the application's buffer.
//!
//! Transport is out of scope; these types are the structural contract. Wire
//! payloads are JSON: deserialization validates shape and numeric ranges and
//! rejects malformed input without touching replica state.

use serde::{Deserialize, Serialize};

use crate::crdt::epoch::EpochId;
use crate::crdt::ids::IdentifierInterval;

/// A positional edit of the materialized text, 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOp {
    Insert { index: usize, content: String },
    Delete { index: usize, length: usize },
}

/// A local insertion: one identifier run carrying its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOp {
    id: IdentifierInterval,
    content: String,
}

impl InsertOp {
    pub fn new(id: IdentifierInterval, content: String) -> Self {
        debug_assert_eq!(
            id.length(),
            content.chars().count(),
            "run length and content length must agree"
        );
        InsertOp { id, content }
    }

    pub fn interval(&self) -> &IdentifierInterval {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// A local deletion. One insert may be deleted across several intervals when
/// concurrent insertions split it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOp {
    lid: Vec<IdentifierInterval>,
}

impl DeleteOp {
    pub fn new(lid: Vec<IdentifierInterval>) -> Self {
        DeleteOp { lid }
    }

    pub fn intervals(&self) -> &[IdentifierInterval] {
        &self.lid
    }
}

/// A replicated operation, tagged with the epoch its identifiers belong to.
///
/// Dispatch is a match on the tag; there is no operation hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    #[serde(rename_all = "camelCase")]
    Insert {
        id: IdentifierInterval,
        content: String,
        epoch: EpochId,
    },
    #[serde(rename_all = "camelCase")]
    Delete {
        lid: Vec<IdentifierInterval>,
        epoch: EpochId,
    },
    #[serde(rename_all = "camelCase")]
    Rename {
        replica_number: i32,
        clock: i32,
        epoch: EpochId,
        parent_epoch: EpochId,
        renamed_id_intervals: Vec<IdentifierInterval>,
    },
}

impl Operation {
    /// The epoch whose identifier scheme the operation speaks.
    pub fn epoch(&self) -> EpochId {
        match self {
            Operation::Insert { epoch, .. } => *epoch,
            Operation::Delete { epoch, .. } => *epoch,
            Operation::Rename { epoch, .. } => *epoch,
        }
    }

    /// Parses and validates an externally supplied payload.
    ///
    /// Returns `None` for anything malformed: unknown tags, missing fields,
    /// numbers outside the int32 range, empty interval lists, inverted
    /// intervals, or content whose length disagrees with its run.
    pub fn from_json(payload: &str) -> Option<Operation> {
        let op: Operation = serde_json::from_str(payload).ok()?;
        if op.is_well_formed() {
            Some(op)
        } else {
            None
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("operations always serialize")
    }

    fn is_well_formed(&self) -> bool {
        match self {
            Operation::Insert { id, content, .. } => {
                !content.is_empty() && content.chars().count() == id.length()
            }
            Operation::Delete { lid, .. } => !lid.is_empty(),
            Operation::Rename {
                renamed_id_intervals,
                epoch,
                parent_epoch,
                replica_number,
                clock,
            } => {
                !renamed_id_intervals.is_empty()
                    && epoch != parent_epoch
                    && epoch.replica_number == *replica_number
                    && epoch.clock == *clock
                    && renamed_id_intervals
                        .windows(2)
                        .all(|pair| pair[0].max_id() < *pair[1].min_id())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ids::{Identifier, IdentifierTuple};

    fn interval(random: i32, begin: i32, end: i32) -> IdentifierInterval {
        IdentifierInterval::new(
            Identifier::from_tuple(IdentifierTuple::new(random, 1, 0, begin)),
            end,
        )
    }

    #[test]
    fn test_insert_round_trip() {
        let op = Operation::Insert {
            id: interval(42, 0, 4),
            content: "hello".to_string(),
            epoch: EpochId::origin(),
        };
        let json = op.to_json();
        assert!(json.contains("\"type\":\"insert\""));
        assert_eq!(Operation::from_json(&json), Some(op));
    }

    #[test]
    fn test_rename_round_trip() {
        let op = Operation::Rename {
            replica_number: 3,
            clock: 7,
            epoch: EpochId::new(3, 7),
            parent_epoch: EpochId::origin(),
            renamed_id_intervals: vec![interval(10, 0, 2), interval(20, 0, 1)],
        };
        let json = op.to_json();
        assert_eq!(Operation::from_json(&json), Some(op));
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        // not JSON
        assert_eq!(Operation::from_json("nonsense"), None);
        // unknown tag
        assert_eq!(Operation::from_json(r#"{"type":"merge"}"#), None);
        // missing fields
        assert_eq!(Operation::from_json(r#"{"type":"insert"}"#), None);
        // content length disagrees with the run
        let op = Operation::Insert {
            id: interval(42, 0, 4),
            content: "hi".to_string(),
            epoch: EpochId::origin(),
        };
        assert_eq!(Operation::from_json(&op.to_json()), None);
        // empty delete
        let op = Operation::Delete {
            lid: vec![],
            epoch: EpochId::origin(),
        };
        assert_eq!(Operation::from_json(&op.to_json()), None);
        // unsorted rename intervals
        let op = Operation::Rename {
            replica_number: 3,
            clock: 7,
            epoch: EpochId::new(3, 7),
            parent_epoch: EpochId::origin(),
            renamed_id_intervals: vec![interval(20, 0, 1), interval(10, 0, 2)],
        };
        assert_eq!(Operation::from_json(&op.to_json()), None);
    }
}
