//! The replicable list: positional edits over a materialized text buffer.
//!
//! `LogootList` couples the rope tree with the text it renders. Local edits
//! return the payloads to broadcast; remote payloads apply through identifier
//! lookup and come back as positional text operations for the caller's
//! buffer. Two replicas that applied the same set of operations render the
//! same text.

use std::fmt;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::crdt::ids::IdentifierInterval;
use crate::crdt::ops::{DeleteOp, InsertOp, TextOp};
use crate::crdt::rope::RopeTree;

/// A replica of the shared sequence.
pub struct LogootList {
    replica_number: i32,
    clock: i32,
    rope: RopeTree,
    text: String,
    rng: StdRng,
}

impl LogootList {
    /// Creates an empty replica with an entropy-seeded generator.
    pub fn new(replica_number: i32) -> Self {
        LogootList {
            replica_number,
            clock: 0,
            rope: RopeTree::new(),
            text: String::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates an empty replica with a fixed seed, for deterministic tests
    /// and benchmarks.
    pub fn with_seed(replica_number: i32, seed: u64) -> Self {
        LogootList {
            replica_number,
            clock: 0,
            rope: RopeTree::new(),
            text: String::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn replica_number(&self) -> i32 {
        self.replica_number
    }

    /// Number of elements in the sequence.
    pub fn len(&self) -> usize {
        self.rope.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.is_empty()
    }

    /// The materialized text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Inserts `content` at position `pos`, returning the operation to
    /// broadcast.
    pub fn insert(&mut self, pos: usize, content: &str) -> Result<InsertOp, &'static str> {
        if content.is_empty() {
            return Err("insertion content must not be empty");
        }
        let length = content.chars().count();
        let interval =
            self.rope
                .insert_local(&mut self.rng, pos, length, self.replica_number, self.clock)?;
        self.clock += 1;
        let byte = byte_index(&self.text, pos);
        self.text.insert_str(byte, content);
        Ok(InsertOp::new(interval, content.to_string()))
    }

    /// Deletes positions `[begin..=end]`, returning the operation to
    /// broadcast. The deletion may cover several identifier runs.
    pub fn delete(&mut self, begin: usize, end: usize) -> Result<DeleteOp, &'static str> {
        let intervals = self.rope.del_local(begin, end)?;
        remove_chars(&mut self.text, begin, end - begin + 1);
        Ok(DeleteOp::new(intervals))
    }

    /// Applies a remote insertion. The run may fragment around concurrent
    /// insertions already present; one text operation is returned per
    /// inserted piece.
    pub fn apply_insert(&mut self, op: &InsertOp) -> Vec<TextOp> {
        let chars: Vec<char> = op.content().chars().collect();
        let op_begin = op.interval().begin();
        let mut out = Vec::new();
        for (pos, fragment) in self.rope.insert_remote(op.interval()) {
            let from = (fragment.begin() - op_begin) as usize;
            let content: String = chars[from..from + fragment.length()].iter().collect();
            let byte = byte_index(&self.text, pos);
            self.text.insert_str(byte, &content);
            out.push(TextOp::Insert {
                index: pos,
                content,
            });
        }
        out
    }

    /// Applies a remote deletion. Idempotent: identifiers already removed
    /// are skipped.
    pub fn apply_delete(&mut self, op: &DeleteOp) -> Vec<TextOp> {
        let mut out = Vec::new();
        for interval in op.intervals() {
            for (pos, length) in self.rope.del_remote(interval) {
                remove_chars(&mut self.text, pos, length);
                out.push(TextOp::Delete {
                    index: pos,
                    length,
                });
            }
        }
        out
    }

    /// In-order snapshot of the identifier runs covering the sequence.
    pub fn id_intervals(&self) -> Vec<IdentifierInterval> {
        self.rope.id_intervals()
    }

    /// Replaces every identifier in the rope, keeping the text. The runs
    /// must cover exactly the current sequence, in order.
    pub(crate) fn replace_rope(&mut self, runs: &[IdentifierInterval]) {
        debug_assert_eq!(
            runs.iter().map(IdentifierInterval::length).sum::<usize>(),
            self.len(),
            "replacement runs must cover the whole sequence"
        );
        self.rope = RopeTree::from_runs(runs);
    }

    /// Consumes a clock value for an operation that is not an insertion.
    pub(crate) fn next_clock(&mut self) -> i32 {
        let clock = self.clock;
        self.clock += 1;
        clock
    }

    /// Validates the rope invariants and the text/rope agreement.
    pub fn check_invariants(&self) {
        self.rope.check_invariants();
        assert_eq!(self.text.chars().count(), self.rope.len());
    }
}

impl fmt::Display for LogootList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn byte_index(s: &str, char_pos: usize) -> usize {
    s.char_indices().nth(char_pos).map_or(s.len(), |(b, _)| b)
}

fn remove_chars(s: &mut String, char_pos: usize, count: usize) {
    let start = byte_index(s, char_pos);
    let end = byte_index(s, char_pos + count);
    s.replace_range(start..end, "");
}
