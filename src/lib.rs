//! # LogootSplit CRDT - Replicated Sequence with Identifier Renaming
//!
//! A Conflict-free Replicated Data Type (CRDT) implementation of a shared,
//! totally ordered sequence, suitable for collaborative text editing where
//! concurrent modifications need to be merged consistently across
//! distributed replicas.
//!
//! ## Features
//!
//! - **Conflict-free**: Concurrent operations can be applied in any order
//!   and will converge
//! - **Split blocks**: Runs of consecutive insertions share one identifier
//!   base, so metadata stays proportional to editing regions, not characters
//! - **Balanced rope**: An AVL tree over identifier runs gives O(log n)
//!   position lookup and update
//! - **Renaming**: Replicas periodically rewrite identifiers into short,
//!   dense forms; epoch-tagged operations stay convergent across renames
//!
//! ## Example
//!
//! ```rust
//! use crdt_logootsplit::RenamableList;
//!
//! let mut alice = RenamableList::with_seed(1, 42);
//! let mut bob = RenamableList::with_seed(2, 43);
//!
//! let op = alice.insert(0, "Hello").unwrap();
//! bob.apply(&op).unwrap();
//! assert_eq!(alice.as_str(), bob.as_str());
//! ```

pub mod crdt;

// Re-export the main public API from the CRDT module
pub use crdt::{create_between, Identifier, IdentifierInterval, IdentifierTuple};
pub use crdt::{Block, LogootList, RenamableList, RopeTree};
pub use crdt::{DeleteOp, Epoch, EpochId, EpochTree, InsertOp, Operation, RenamingMap, TextOp};
pub use crdt::{INT32_BOTTOM, INT32_TOP, MAX_TUPLE, MIN_TUPLE};
