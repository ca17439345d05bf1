//! The LogootSplit CRDT implementation.
//!
//! This module contains the identifier algebra, the block rope tree, the
//! replicable list façade, and the renaming protocol, along with the
//! operation payloads exchanged between replicas.

pub mod block;
pub mod epoch;
pub mod ids;
pub mod list;
pub mod ops;
pub mod renamable;
pub mod renaming;
pub mod rope;

// Re-export the main public API
pub use block::Block;
pub use epoch::{Epoch, EpochId, EpochTree};
pub use ids::{
    create_between, Identifier, IdentifierInterval, IdentifierTuple, INT32_BOTTOM, INT32_TOP,
    MAX_TUPLE, MIN_TUPLE,
};
pub use list::LogootList;
pub use ops::{DeleteOp, InsertOp, Operation, TextOp};
pub use renamable::RenamableList;
pub use renaming::RenamingMap;
pub use rope::RopeTree;
