//! Generation of fresh identifiers between two existing ones.
//!
//! The generator walks the two bounding identifiers in lockstep, inheriting
//! tuples while the random components are too close to admit an integer
//! between them, then mints a single fresh tuple carrying the caller's
//! replica number and clock. The inherited prefix keeps the result above the
//! lower bound; the fresh tuple keeps it below the upper bound.

use rand::Rng;

use crate::crdt::ids::identifier::Identifier;
use crate::crdt::ids::tuple::{IdentifierTuple, MAX_TUPLE, MIN_TUPLE};

/// Cursor over an identifier's tuples that yields a sentinel pad once the
/// sequence is exhausted.
struct TupleCursor<'a> {
    tuples: &'a [IdentifierTuple],
    index: usize,
    pad: IdentifierTuple,
}

impl<'a> TupleCursor<'a> {
    fn new(id: Option<&'a Identifier>, pad: IdentifierTuple) -> Self {
        TupleCursor {
            tuples: id.map_or(&[][..], |i| i.tuples()),
            index: 0,
            pad,
        }
    }

    fn next(&mut self) -> IdentifierTuple {
        match self.tuples.get(self.index) {
            Some(&t) => {
                self.index += 1;
                t
            }
            None => self.pad,
        }
    }
}

/// Generates a fresh identifier strictly between `id1` and `id2`.
///
/// `None` bounds stand for the virtual extremes of the space. When both
/// bounds are present, `id1 < id2` is a precondition. The returned
/// identifier's final tuple is the only one carrying the caller's
/// `(replica_number, clock)`; every earlier tuple is inherited from `id1`
/// (or is a sentinel pad).
pub fn create_between<R: Rng + ?Sized>(
    rng: &mut R,
    id1: Option<&Identifier>,
    id2: Option<&Identifier>,
    replica_number: i32,
    clock: i32,
) -> Identifier {
    if let (Some(a), Some(b)) = (id1, id2) {
        debug_assert!(a < b, "lower bound must sort before upper bound");
    }

    let mut lower = TupleCursor::new(id1, MIN_TUPLE);
    let mut upper = TupleCursor::new(id2, MAX_TUPLE);
    let mut tuples = Vec::new();

    loop {
        let t1 = lower.next();
        let t2 = upper.next();
        // i64 arithmetic: the gap overflows i32 at the sentinel extremes.
        let low = t1.random as i64;
        let high = t2.random as i64;
        if high - low >= 2 {
            let random = rng.gen_range(low + 1..high) as i32;
            tuples.push(IdentifierTuple::new(random, replica_number, clock, 0));
            return Identifier::new(tuples);
        }
        tuples.push(t1);
    }
}
