//! Block metadata: a run of consecutive identifiers plus its live count.
//!
//! A block tracks the full identifier interval ever assigned to a run,
//! including offsets whose elements have since been deleted. The live
//! element count can reach zero while the interval still participates in
//! identifier arithmetic; the rope frees the block once nothing references
//! it.

use crate::crdt::ids::IdentifierInterval;

/// Metadata of a live run of consecutive identifiers.
#[derive(Debug, Clone)]
pub struct Block {
    interval: IdentifierInterval,
    nb_element: usize,
}

impl Block {
    /// Creates a block covering `interval` with every element live.
    pub fn new(interval: IdentifierInterval) -> Self {
        let nb_element = interval.length();
        Block {
            interval,
            nb_element,
        }
    }

    pub fn interval(&self) -> &IdentifierInterval {
        &self.interval
    }

    /// Count of live elements across every rope node sharing this block.
    pub fn nb_element(&self) -> usize {
        self.nb_element
    }

    /// Grows the block's interval by the abutting run `[begin..=end]` and
    /// counts its elements as live.
    pub fn grow(&mut self, begin: i32, end: i32) {
        self.interval = self.interval.union(begin, end);
        self.nb_element += (end as i64 - begin as i64 + 1) as usize;
    }

    /// Records the removal of `count` live elements.
    pub fn remove_elements(&mut self, count: usize) {
        debug_assert!(count <= self.nb_element);
        self.nb_element -= count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ids::{Identifier, IdentifierTuple};

    #[test]
    fn test_block_lifecycle() {
        let interval = IdentifierInterval::new(
            Identifier::from_tuple(IdentifierTuple::new(42, 1, 0, 0)),
            4,
        );
        let mut block = Block::new(interval);
        assert_eq!(block.nb_element(), 5);

        block.grow(5, 7);
        assert_eq!(block.nb_element(), 8);
        assert_eq!(block.interval().end(), 7);

        block.remove_elements(8);
        assert_eq!(block.nb_element(), 0);
        assert_eq!(block.interval().length(), 8);
    }
}
