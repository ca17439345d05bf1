//! The renamable list: epoch-tagged operations over the replicable list.
//!
//! Wraps [`LogootList`] with the epoch machinery. Local edits come out
//! tagged with the current epoch; remote operations from other epochs are
//! translated identifier by identifier through the epoch tree before they
//! apply. A rename snapshots the whole sequence, installs a child epoch, and
//! rewrites the local rope into the dense scheme.

use tracing::{debug, trace};

use crate::crdt::epoch::{EpochId, EpochTree};
use crate::crdt::ids::{Identifier, IdentifierInterval};
use crate::crdt::list::LogootList;
use crate::crdt::ops::{DeleteOp, InsertOp, Operation, TextOp};
use crate::crdt::renaming::RenamingMap;

/// A rename whose parent epoch has not been observed yet.
struct PendingRename {
    replica_number: i32,
    clock: i32,
    epoch: EpochId,
    parent_epoch: EpochId,
    renamed_id_intervals: Vec<IdentifierInterval>,
}

/// A replica of the shared sequence with identifier renaming.
pub struct RenamableList {
    list: LogootList,
    epochs: EpochTree,
    current_epoch: EpochId,
    pending_renames: Vec<PendingRename>,
}

impl RenamableList {
    pub fn new(replica_number: i32) -> Self {
        RenamableList {
            list: LogootList::new(replica_number),
            epochs: EpochTree::new(),
            current_epoch: EpochId::origin(),
            pending_renames: Vec::new(),
        }
    }

    /// Deterministic variant for tests and benchmarks.
    pub fn with_seed(replica_number: i32, seed: u64) -> Self {
        RenamableList {
            list: LogootList::with_seed(replica_number, seed),
            epochs: EpochTree::new(),
            current_epoch: EpochId::origin(),
            pending_renames: Vec::new(),
        }
    }

    pub fn replica_number(&self) -> i32 {
        self.list.replica_number()
    }

    pub fn current_epoch(&self) -> EpochId {
        self.current_epoch
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn as_str(&self) -> &str {
        self.list.as_str()
    }

    /// Inserts `content` at `pos`, returning the operation to broadcast.
    pub fn insert(&mut self, pos: usize, content: &str) -> Result<Operation, &'static str> {
        let op = self.list.insert(pos, content)?;
        Ok(Operation::Insert {
            id: op.interval().clone(),
            content: op.content().to_string(),
            epoch: self.current_epoch,
        })
    }

    /// Deletes positions `[begin..=end]`, returning the operation to
    /// broadcast.
    pub fn delete(&mut self, begin: usize, end: usize) -> Result<Operation, &'static str> {
        let op = self.list.delete(begin, end)?;
        Ok(Operation::Delete {
            lid: op.intervals().to_vec(),
            epoch: self.current_epoch,
        })
    }

    /// Rewrites every identifier of the sequence into a short dense form
    /// under a fresh epoch, returning the rename operation to broadcast.
    pub fn rename(&mut self) -> Result<Operation, &'static str> {
        if self.list.is_empty() {
            return Err("cannot rename an empty sequence");
        }
        let renamed_id_intervals = self.list.id_intervals();
        let replica_number = self.list.replica_number();
        let clock = self.list.next_clock();
        let epoch = EpochId::new(replica_number, clock);
        let parent_epoch = self.current_epoch;

        let map = RenamingMap::new(replica_number, clock, renamed_id_intervals.clone());
        let dense_run = IdentifierInterval::new(map.new_id(0), map.max_offset());
        self.epochs.insert(epoch, parent_epoch, map)?;
        self.list.replace_rope(&[dense_run]);
        self.current_epoch = epoch;
        debug!(
            replica = replica_number,
            clock,
            elements = self.list.len(),
            "issued rename"
        );

        Ok(Operation::Rename {
            replica_number,
            clock,
            epoch,
            parent_epoch,
            renamed_id_intervals,
        })
    }

    /// Applies a remote operation, translating its identifiers into the
    /// local epoch first. Returns the text operations for the caller's
    /// buffer, or an error (leaving the state untouched) when the operation
    /// references an epoch this replica has never seen.
    pub fn apply(&mut self, op: &Operation) -> Result<Vec<TextOp>, &'static str> {
        match op {
            Operation::Insert { id, content, epoch } => self.apply_insert(id, content, *epoch),
            Operation::Delete { lid, epoch } => self.apply_delete(lid, *epoch),
            Operation::Rename {
                replica_number,
                clock,
                epoch,
                parent_epoch,
                renamed_id_intervals,
            } => self.apply_rename(
                *replica_number,
                *clock,
                *epoch,
                *parent_epoch,
                renamed_id_intervals,
            ),
        }
    }

    fn apply_insert(
        &mut self,
        id: &IdentifierInterval,
        content: &str,
        epoch: EpochId,
    ) -> Result<Vec<TextOp>, &'static str> {
        if epoch == self.current_epoch {
            return Ok(self
                .list
                .apply_insert(&InsertOp::new(id.clone(), content.to_string())));
        }
        if !self.epochs.contains(epoch) {
            return Err("operation references an unknown epoch");
        }
        trace!(from = ?epoch, to = ?self.current_epoch, "translating insert across epochs");
        let translated = self.translate_interval(id, epoch);
        let chars: Vec<char> = content.chars().collect();
        let mut out = Vec::new();
        for (run, range) in group_runs(&translated) {
            let piece: String = chars[range].iter().collect();
            out.extend(self.list.apply_insert(&InsertOp::new(run, piece)));
        }
        Ok(out)
    }

    fn apply_delete(
        &mut self,
        lid: &[IdentifierInterval],
        epoch: EpochId,
    ) -> Result<Vec<TextOp>, &'static str> {
        if epoch == self.current_epoch {
            return Ok(self.list.apply_delete(&DeleteOp::new(lid.to_vec())));
        }
        if !self.epochs.contains(epoch) {
            return Err("operation references an unknown epoch");
        }
        trace!(from = ?epoch, to = ?self.current_epoch, "translating delete across epochs");
        let mut runs = Vec::new();
        for interval in lid {
            let translated = self.translate_interval(interval, epoch);
            runs.extend(group_runs(&translated).into_iter().map(|(run, _)| run));
        }
        Ok(self.list.apply_delete(&DeleteOp::new(runs)))
    }

    fn apply_rename(
        &mut self,
        replica_number: i32,
        clock: i32,
        epoch: EpochId,
        parent_epoch: EpochId,
        renamed_id_intervals: &[IdentifierInterval],
    ) -> Result<Vec<TextOp>, &'static str> {
        if self.epochs.contains(epoch) {
            // Duplicate delivery.
            return Ok(Vec::new());
        }
        if !self.epochs.contains(parent_epoch) {
            debug!(?epoch, ?parent_epoch, "buffering rename until its parent epoch arrives");
            self.pending_renames.push(PendingRename {
                replica_number,
                clock,
                epoch,
                parent_epoch,
                renamed_id_intervals: renamed_id_intervals.to_vec(),
            });
            return Ok(Vec::new());
        }

        let map = RenamingMap::new(replica_number, clock, renamed_id_intervals.to_vec());
        self.epochs.insert(epoch, parent_epoch, map)?;
        self.drain_pending_renames();
        self.adopt_best_epoch();
        Ok(Vec::new())
    }

    fn drain_pending_renames(&mut self) {
        let mut progressed = true;
        while progressed {
            progressed = false;
            let mut i = 0;
            while i < self.pending_renames.len() {
                let parent_known = self.epochs.contains(self.pending_renames[i].parent_epoch);
                if parent_known {
                    let pending = self.pending_renames.swap_remove(i);
                    if !self.epochs.contains(pending.epoch) {
                        let map = RenamingMap::new(
                            pending.replica_number,
                            pending.clock,
                            pending.renamed_id_intervals,
                        );
                        let inserted = self.epochs.insert(pending.epoch, pending.parent_epoch, map);
                        debug_assert!(inserted.is_ok());
                    }
                    progressed = true;
                } else {
                    i += 1;
                }
            }
        }
    }

    /// Moves the replica onto the epoch every replica converges on,
    /// rewriting the local identifiers through the epoch-tree path.
    fn adopt_best_epoch(&mut self) {
        let best = self.epochs.best_epoch();
        if best == self.current_epoch {
            return;
        }
        let translated: Vec<Identifier> = self
            .list
            .id_intervals()
            .iter()
            .flat_map(|interval| interval.ids())
            .map(|id| self.epochs.translate(&id, self.current_epoch, best))
            .collect();
        let runs: Vec<IdentifierInterval> =
            group_runs(&translated).into_iter().map(|(run, _)| run).collect();
        self.list.replace_rope(&runs);
        debug!(from = ?self.current_epoch, to = ?best, "adopted epoch");
        self.current_epoch = best;
    }

    fn translate_interval(&self, interval: &IdentifierInterval, from: EpochId) -> Vec<Identifier> {
        interval
            .ids()
            .map(|id| self.epochs.translate(&id, from, self.current_epoch))
            .collect()
    }

    /// Validates the underlying list invariants.
    pub fn check_invariants(&self) {
        self.list.check_invariants();
    }
}

/// Regroups an ordered identifier list into maximal runs of same-base,
/// consecutive-offset identifiers, each paired with the element index range
/// it covers.
fn group_runs(ids: &[Identifier]) -> Vec<(IdentifierInterval, std::ops::Range<usize>)> {
    let mut out = Vec::new();
    if ids.is_empty() {
        return out;
    }
    let mut start = 0;
    for i in 1..=ids.len() {
        let continues = i < ids.len()
            && ids[i].equals_base(&ids[i - 1])
            && ids[i].last_offset() as i64 == ids[i - 1].last_offset() as i64 + 1;
        if !continues {
            let run = IdentifierInterval::new(ids[start].clone(), ids[i - 1].last_offset());
            out.push((run, start..i));
            start = i;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync(to: &mut RenamableList, op: &Operation) {
        to.apply(op).unwrap();
    }

    #[test]
    fn test_ops_carry_current_epoch() {
        let mut list = RenamableList::with_seed(1, 1);
        let op = list.insert(0, "abc").unwrap();
        assert_eq!(op.epoch(), EpochId::origin());

        let rename = list.rename().unwrap();
        match &rename {
            Operation::Rename { epoch, parent_epoch, .. } => {
                assert_eq!(*parent_epoch, EpochId::origin());
                assert_eq!(list.current_epoch(), *epoch);
            }
            _ => panic!("rename must produce a rename operation"),
        }

        let op = list.insert(3, "d").unwrap();
        assert_eq!(op.epoch(), list.current_epoch());
        assert_eq!(list.as_str(), "abcd");
    }

    #[test]
    fn test_rename_empty_rejected() {
        let mut list = RenamableList::with_seed(1, 1);
        assert!(list.rename().is_err());
    }

    #[test]
    fn test_remote_rename_adoption() {
        let mut a = RenamableList::with_seed(1, 1);
        let mut b = RenamableList::with_seed(2, 2);

        let ins = a.insert(0, "hello").unwrap();
        sync(&mut b, &ins);

        let rename = a.rename().unwrap();
        sync(&mut b, &rename);

        assert_eq!(b.current_epoch(), a.current_epoch());
        assert_eq!(b.as_str(), "hello");
        a.check_invariants();
        b.check_invariants();
    }

    #[test]
    fn test_insert_from_old_epoch_translates() {
        let mut a = RenamableList::with_seed(1, 1);
        let mut b = RenamableList::with_seed(2, 2);

        let ins = a.insert(0, "ace").unwrap();
        sync(&mut b, &ins);

        // b edits while a renames: b's op is tagged with the origin epoch.
        let concurrent = b.insert(1, "b").unwrap();
        let rename = a.rename().unwrap();

        a.apply(&concurrent).unwrap();
        b.apply(&rename).unwrap();

        assert_eq!(a.as_str(), "abce");
        assert_eq!(b.as_str(), "abce");
        assert_eq!(a.current_epoch(), b.current_epoch());
        a.check_invariants();
        b.check_invariants();
    }

    #[test]
    fn test_unknown_epoch_rejected_without_mutation() {
        let mut a = RenamableList::with_seed(1, 1);
        let op = Operation::Insert {
            id: IdentifierInterval::new(
                Identifier::from_tuple(crate::crdt::ids::IdentifierTuple::new(5, 9, 9, 0)),
                0,
            ),
            content: "x".to_string(),
            epoch: EpochId::new(9, 9),
        };
        assert!(a.apply(&op).is_err());
        assert_eq!(a.as_str(), "");
    }

    #[test]
    fn test_rename_buffered_until_parent_known() {
        let mut a = RenamableList::with_seed(1, 1);
        let mut b = RenamableList::with_seed(2, 2);
        let mut c = RenamableList::with_seed(3, 3);

        let ins = a.insert(0, "xy").unwrap();
        sync(&mut b, &ins);
        sync(&mut c, &ins);

        let first = a.rename().unwrap();
        sync(&mut b, &first);
        let second = b.rename().unwrap();

        // c sees the second rename before the first.
        c.apply(&second).unwrap();
        assert_eq!(c.current_epoch(), EpochId::origin());
        c.apply(&first).unwrap();

        assert_eq!(c.current_epoch(), b.current_epoch());
        assert_eq!(c.as_str(), "xy");
        c.check_invariants();
    }

    #[test]
    fn test_concurrent_renames_converge() {
        let mut a = RenamableList::with_seed(1, 1);
        let mut b = RenamableList::with_seed(2, 2);

        let ins = a.insert(0, "abc").unwrap();
        sync(&mut b, &ins);

        let ra = a.rename().unwrap();
        let rb = b.rename().unwrap();
        a.apply(&rb).unwrap();
        b.apply(&ra).unwrap();

        assert_eq!(a.current_epoch(), b.current_epoch());
        assert_eq!(a.as_str(), "abc");
        assert_eq!(b.as_str(), "abc");
        a.check_invariants();
        b.check_invariants();
    }
}
