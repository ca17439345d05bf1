//! The rope tree: a self-balancing ordered tree of identifier runs.
//!
//! The tree maps integer positions in the rendered sequence to identifiers
//! and back. Each node holds the live sub-range of a block; the in-order
//! traversal yields the sequence order, and per-subtree live counts give
//! O(log n) positional lookup.
//!
//! Nodes live in an arena and link to each other by index, so AVL rotations
//! are index swaps. Blocks live in a parallel arena and may be shared by
//! several nodes after a deletion splits a run.

use std::collections::{BTreeSet, HashMap};

use rand::Rng;

use crate::crdt::block::Block;
use crate::crdt::ids::{create_between, Identifier, IdentifierInterval};

/// A rope node: the live sub-interval `[offset_begin..=offset_end]` of a
/// block, plus AVL bookkeeping.
#[derive(Debug, Clone, Copy)]
struct RopeNode {
    block: usize,
    offset_begin: i32,
    offset_end: i32,
    left: Option<usize>,
    right: Option<usize>,
    height: i32,
    /// Live elements in this node and both subtrees.
    size: usize,
}

/// Balanced ordered tree of blocks keyed by their identifier intervals.
pub struct RopeTree {
    nodes: Vec<RopeNode>,
    free_nodes: Vec<usize>,
    blocks: Vec<Block>,
    block_refs: Vec<usize>,
    free_blocks: Vec<usize>,
    root: Option<usize>,
}

impl RopeTree {
    pub fn new() -> Self {
        RopeTree {
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            blocks: Vec::new(),
            block_refs: Vec::new(),
            free_blocks: Vec::new(),
            root: None,
        }
    }

    /// Builds a balanced tree from an in-order list of live runs.
    pub fn from_runs(runs: &[IdentifierInterval]) -> Self {
        let mut tree = RopeTree::new();
        tree.root = tree.build_balanced(runs);
        tree
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.root.map_or(0, |r| self.nodes[r].size)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Identifier of the element at `pos`, if any.
    pub fn id_at(&self, pos: usize) -> Option<Identifier> {
        let (i, off) = self.locate(pos)?;
        let n = &self.nodes[i];
        Some(self.blocks[n.block].interval().id_at(n.offset_begin + off))
    }

    /// In-order snapshot of the live runs, with abutting same-base runs
    /// coalesced. Covers the entire sequence.
    pub fn id_intervals(&self) -> Vec<IdentifierInterval> {
        let mut out = Vec::new();
        self.collect_runs(self.root, &mut out);
        out
    }

    /// Inserts `length` fresh elements at `pos`, returning the identifier
    /// interval that carries them.
    ///
    /// When `pos` follows the tail of a block this replica owns, the block
    /// is extended instead of minting a fresh identifier, so consecutive
    /// local typing stays in one run.
    pub fn insert_local<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        pos: usize,
        length: usize,
        replica_number: i32,
        clock: i32,
    ) -> Result<IdentifierInterval, &'static str> {
        debug_assert!(length > 0, "insertions carry at least one element");
        if pos > self.len() {
            return Err("insert position out of range");
        }

        if pos > 0 {
            if let Some(interval) = self.try_local_append(pos, length, replica_number) {
                return Ok(interval);
            }
        }

        let pred = if pos > 0 { self.id_at(pos - 1) } else { None };
        let succ = self.id_at(pos);
        self.split_boundary(pos);
        let fresh = create_between(rng, pred.as_ref(), succ.as_ref(), replica_number, clock);
        let begin = fresh.last_offset();
        let interval = IdentifierInterval::new(fresh, begin + length as i32 - 1);

        let block = self.alloc_block(Block::new(interval.clone()));
        let idx = self.alloc_node(block, interval.begin(), interval.end());
        self.root = Some(self.insert_by_id(self.root, idx));
        Ok(interval)
    }

    /// Integrates a remote run, splitting it around any already-present
    /// descendants of its members and growing adjacent blocks where the run
    /// abuts them. Returns the inserted sub-runs with the position each one
    /// landed at, in ascending order.
    pub fn insert_remote(&mut self, interval: &IdentifierInterval) -> Vec<(usize, IdentifierInterval)> {
        let mut present = BTreeSet::new();
        let mut split_after = BTreeSet::new();
        self.collect_obstacles(self.root, interval, &mut present, &mut split_after);
        debug_assert!(present.is_empty(), "insert delivered twice");

        let mut out = Vec::new();
        for frag in build_fragments(interval, &present, &split_after) {
            let pos = self.insert_fragment(&frag);
            out.push((pos, frag));
        }
        out
    }

    /// Removes positions `[begin..=end]`, returning the identifier intervals
    /// that covered them (possibly crossing several nodes).
    pub fn del_local(
        &mut self,
        begin: usize,
        end: usize,
    ) -> Result<Vec<IdentifierInterval>, &'static str> {
        if begin > end || end >= self.len() {
            return Err("delete range out of range");
        }
        let mut out = Vec::new();
        let mut remaining = end - begin + 1;
        while remaining > 0 {
            let root = self.root.expect("non-empty tree");
            let (new_root, interval, removed) = self.remove_run_at(root, begin, remaining);
            self.root = new_root;
            out.push(interval);
            remaining -= removed;
        }
        Ok(out)
    }

    /// Removes whatever part of `interval` is live. Idempotent: absent
    /// identifiers are skipped. Returns the removed `(position, length)`
    /// runs in descending position order, each measured against the tree
    /// state it was removed from.
    pub fn del_remote(&mut self, interval: &IdentifierInterval) -> Vec<(usize, usize)> {
        let mut runs = Vec::new();
        self.collect_overlaps(self.root, interval, 0, &mut runs);
        for &(pos, len) in runs.iter().rev() {
            let root = self.root.expect("non-empty tree");
            let (new_root, _, removed) = self.remove_run_at(root, pos, len);
            debug_assert_eq!(removed, len);
            self.root = new_root;
        }
        runs.reverse();
        runs
    }

    /// Validates the structural invariants: binary-search order by
    /// identifier, AVL balance, subtree sizes, and per-block live counts.
    /// Panics on the first violation.
    pub fn check_invariants(&self) {
        let mut live: HashMap<usize, usize> = HashMap::new();
        if let Some(root) = self.root {
            self.check_node(root, None, None, &mut live);
        }
        for (block, count) in live {
            assert_eq!(
                self.blocks[block].nb_element(),
                count,
                "block live count out of sync"
            );
        }
    }

    // ---- positional navigation ----

    fn locate(&self, mut pos: usize) -> Option<(usize, i32)> {
        let mut cur = self.root;
        while let Some(i) = cur {
            let n = &self.nodes[i];
            let lsize = self.size(n.left);
            let span = self.span(i);
            if pos < lsize {
                cur = n.left;
            } else if pos < lsize + span {
                return Some((i, (pos - lsize) as i32));
            } else {
                pos -= lsize + span;
                cur = n.right;
            }
        }
        None
    }

    /// Number of live elements with an identifier strictly below `id`.
    /// `id` itself need not be present.
    fn rank_of(&self, id: &Identifier) -> usize {
        let mut acc = 0usize;
        let mut cur = self.root;
        while let Some(i) = cur {
            let n = self.nodes[i];
            let min = self.node_min_id(i);
            if *id < min {
                cur = n.left;
                continue;
            }
            let max = self.node_max_id(i);
            if *id > max {
                acc += self.size(n.left) + self.span(i);
                cur = n.right;
                continue;
            }
            // id falls within this node's run: it either is a member or
            // extends one (anything strictly between two consecutive
            // members extends the lower of the two).
            acc += self.size(n.left);
            let base_len = self.blocks[n.block].interval().min_id().len();
            debug_assert!(id.len() >= base_len);
            let offset = id.tuples()[base_len - 1].offset;
            acc += (offset - n.offset_begin) as usize;
            if id.len() > base_len {
                acc += 1;
            }
            return acc;
        }
        acc
    }

    fn node_min_id(&self, i: usize) -> Identifier {
        let n = &self.nodes[i];
        self.blocks[n.block].interval().id_at(n.offset_begin)
    }

    fn node_max_id(&self, i: usize) -> Identifier {
        let n = &self.nodes[i];
        self.blocks[n.block].interval().id_at(n.offset_end)
    }

    // ---- local insertion ----

    fn try_local_append(
        &mut self,
        pos: usize,
        length: usize,
        replica_number: i32,
    ) -> Option<IdentifierInterval> {
        let (pi, poff) = self.locate(pos - 1)?;
        let n = self.nodes[pi];
        let interval = self.blocks[n.block].interval().clone();

        let at_live_end = poff == n.offset_end - n.offset_begin;
        let at_block_end = n.offset_end == interval.end();
        let own = interval.min_id().tuples().last().unwrap().replica_number == replica_number;
        let headroom = interval.end() as i64 + length as i64 <= i32::MAX as i64;
        if !(at_live_end && at_block_end && own && headroom) {
            return None;
        }

        let begin = interval.end() + 1;
        let end = interval.end() + length as i32;
        let candidate = interval.id_at(begin);
        if let Some(succ) = self.id_at(pos) {
            if candidate >= succ {
                return None;
            }
        }

        self.blocks[n.block].grow(begin, end);
        let root = self.root.expect("non-empty tree");
        self.extend_at(root, pos - 1, length, true);
        Some(IdentifierInterval::new(candidate, end))
    }

    // ---- remote insertion ----

    /// Records, over the subtree, which offsets of `interval` are already
    /// live (`present`) and after which offsets an existing identifier sits
    /// inside the run's gaps (`split_after`).
    fn collect_obstacles(
        &self,
        cur: Option<usize>,
        interval: &IdentifierInterval,
        present: &mut BTreeSet<i32>,
        split_after: &mut BTreeSet<i32>,
    ) {
        let Some(i) = cur else { return };
        let n = &self.nodes[i];
        let min = self.node_min_id(i);
        let max = self.node_max_id(i);
        let imin = interval.min_id();
        let imax = interval.max_id();

        if imax < min {
            self.collect_obstacles(n.left, interval, present, split_after);
            return;
        }
        if *imin > max {
            self.collect_obstacles(n.right, interval, present, split_after);
            return;
        }

        self.collect_obstacles(n.left, interval, present, split_after);
        self.collect_obstacles(n.right, interval, present, split_after);

        let node_interval = self.blocks[n.block].interval();
        if node_interval.equals_base(interval) {
            let lo = n.offset_begin.max(interval.begin());
            let hi = n.offset_end.min(interval.end());
            for o in lo..=hi {
                present.insert(o);
            }
            return;
        }

        // A different-base node inside the run's span extends one of the
        // run's members; the run must split after that member's offset.
        let base_len = imin.len();
        let tuples = min.tuples();
        if tuples.len() > base_len
            && tuples[..base_len - 1] == imin.tuples()[..base_len - 1]
            && tuples[base_len - 1].equals_base(&imin.tuples()[base_len - 1])
        {
            let o = tuples[base_len - 1].offset;
            if interval.begin() <= o && o < interval.end() {
                split_after.insert(o);
            }
        }
    }

    fn insert_fragment(&mut self, frag: &IdentifierInterval) -> usize {
        let rank = self.rank_of(frag.min_id());
        self.split_boundary(rank);

        // Grow the predecessor block when the run extends it.
        if rank > 0 {
            if let Some((pi, poff)) = self.locate(rank - 1) {
                let n = self.nodes[pi];
                let block_interval = self.blocks[n.block].interval().clone();
                let at_live_end = poff == n.offset_end - n.offset_begin;
                let at_block_end = n.offset_end == block_interval.end();
                if at_live_end
                    && at_block_end
                    && block_interval.equals_base(frag)
                    && frag.begin() as i64 == n.offset_end as i64 + 1
                {
                    self.blocks[n.block].grow(frag.begin(), frag.end());
                    let root = self.root.expect("non-empty tree");
                    self.extend_at(root, rank - 1, frag.length(), true);
                    self.try_merge_after(rank + frag.length() - 1);
                    return rank;
                }
            }
        }

        // Grow the successor block when the run prepends to it.
        if rank < self.len() {
            if let Some((si, soff)) = self.locate(rank) {
                let n = self.nodes[si];
                let block_interval = self.blocks[n.block].interval().clone();
                if soff == 0
                    && n.offset_begin == block_interval.begin()
                    && block_interval.equals_base(frag)
                    && frag.end() as i64 + 1 == n.offset_begin as i64
                {
                    self.blocks[n.block].grow(frag.begin(), frag.end());
                    let root = self.root.expect("non-empty tree");
                    self.extend_at(root, rank, frag.length(), false);
                    return rank;
                }
            }
        }

        let block = self.alloc_block(Block::new(frag.clone()));
        let idx = self.alloc_node(block, frag.begin(), frag.end());
        self.root = Some(self.insert_by_id(self.root, idx));
        rank
    }

    /// Ensures `pos` is a node boundary, splitting the node whose live run
    /// covers both `pos - 1` and `pos`. Identifiers about to be inserted at
    /// `pos` sort between those two elements, so no node may span the gap.
    fn split_boundary(&mut self, pos: usize) {
        if pos == 0 || pos >= self.len() {
            return;
        }
        let root = self.root.expect("non-empty tree");
        self.root = Some(self.split_at(root, pos));
    }

    fn split_at(&mut self, i: usize, pos: usize) -> usize {
        let n = self.nodes[i];
        let lsize = self.size(n.left);
        let span = self.span(i);
        if pos < lsize {
            let l = self.split_at(n.left.expect("in range"), pos);
            self.nodes[i].left = Some(l);
        } else if pos == lsize || pos == lsize + span {
            // Already a boundary.
            return i;
        } else if pos < lsize + span {
            let keep_end = n.offset_begin + (pos - lsize) as i32 - 1;
            let right_part = self.alloc_node(n.block, keep_end + 1, n.offset_end);
            self.nodes[i].offset_end = keep_end;
            let r = self.insert_leftmost(self.nodes[i].right, right_part);
            self.nodes[i].right = Some(r);
        } else {
            let r = self.split_at(n.right.expect("in range"), pos - lsize - span);
            self.nodes[i].right = Some(r);
        }
        self.balance(i)
    }

    /// Merges the node holding position `pos` with its in-order successor
    /// node when both hold abutting live runs of the same base and the
    /// successor owns its whole block. Opportunistic.
    fn try_merge_after(&mut self, pos: usize) {
        if pos + 1 >= self.len() {
            return;
        }
        let (pi, _) = match self.locate(pos) {
            Some(found) => found,
            None => return,
        };
        let (si, _) = match self.locate(pos + 1) {
            Some(found) => found,
            None => return,
        };
        if pi == si {
            return;
        }
        let pn = self.nodes[pi];
        let sn = self.nodes[si];
        if pn.block == sn.block {
            return;
        }
        let pred_interval = self.blocks[pn.block].interval().clone();
        let succ_interval = self.blocks[sn.block].interval().clone();

        let abutting = pn.offset_end as i64 + 1 == sn.offset_begin as i64;
        let pred_at_block_end = pn.offset_end == pred_interval.end();
        let succ_whole_block = sn.offset_begin == succ_interval.begin()
            && sn.offset_end == succ_interval.end()
            && self.block_refs[sn.block] == 1;
        if !(abutting && pred_at_block_end && succ_whole_block)
            || !pred_interval.equals_base(&succ_interval)
        {
            return;
        }

        let added = self.span(si);
        let succ_min = self.node_min_id(si);
        self.blocks[sn.block].remove_elements(added);
        self.root = self.remove_exact(self.root, &succ_min);
        self.blocks[pn.block].grow(sn.offset_begin, sn.offset_end);
        let root = self.root.expect("non-empty tree");
        self.extend_at(root, pos, added, true);
    }

    // ---- deletion ----

    /// Removes up to `max_len` live elements starting at position `start`,
    /// stopping at the end of the node that holds `start`. Returns the new
    /// subtree root, the removed identifier run, and its length.
    fn remove_run_at(
        &mut self,
        i: usize,
        start: usize,
        max_len: usize,
    ) -> (Option<usize>, IdentifierInterval, usize) {
        let n = self.nodes[i];
        let lsize = self.size(n.left);
        let span = self.span(i);

        if start < lsize {
            let (l, interval, removed) = self.remove_run_at(n.left.expect("in range"), start, max_len);
            self.nodes[i].left = l;
            return (Some(self.balance(i)), interval, removed);
        }
        if start >= lsize + span {
            let (r, interval, removed) =
                self.remove_run_at(n.right.expect("in range"), start - lsize - span, max_len);
            self.nodes[i].right = r;
            return (Some(self.balance(i)), interval, removed);
        }

        let first = n.offset_begin + (start - lsize) as i32;
        let removed = max_len.min((n.offset_end as i64 - first as i64 + 1) as usize);
        let last = (first as i64 + removed as i64 - 1) as i32;
        let interval = self.blocks[n.block].interval().sub(first, last);
        self.blocks[n.block].remove_elements(removed);

        let res = if first == n.offset_begin && last == n.offset_end {
            self.unlink(i)
        } else if first == n.offset_begin {
            self.nodes[i].offset_begin = last + 1;
            Some(self.balance(i))
        } else if last == n.offset_end {
            self.nodes[i].offset_end = first - 1;
            Some(self.balance(i))
        } else {
            // Interior cut: the node splits into two nodes sharing the block.
            let right_part = self.alloc_node(n.block, last + 1, n.offset_end);
            self.nodes[i].offset_end = first - 1;
            let r = self.insert_leftmost(self.nodes[i].right, right_part);
            self.nodes[i].right = Some(r);
            Some(self.balance(i))
        };
        (res, interval, removed)
    }

    /// In-order `(position, length)` overlaps of `interval` with the live
    /// runs of the subtree rooted at `cur`, where `acc` is the rank of that
    /// subtree's first element.
    fn collect_overlaps(
        &self,
        cur: Option<usize>,
        interval: &IdentifierInterval,
        acc: usize,
        out: &mut Vec<(usize, usize)>,
    ) {
        let Some(i) = cur else { return };
        let n = &self.nodes[i];
        let lsize = self.size(n.left);
        let min = self.node_min_id(i);
        let max = self.node_max_id(i);

        if *interval.min_id() < min {
            self.collect_overlaps(n.left, interval, acc, out);
        }
        if self.blocks[n.block].interval().equals_base(interval) {
            let lo = n.offset_begin.max(interval.begin());
            let hi = n.offset_end.min(interval.end());
            if lo <= hi {
                out.push((
                    acc + lsize + (lo - n.offset_begin) as usize,
                    (hi - lo + 1) as usize,
                ));
            }
        }
        if interval.max_id() > max {
            self.collect_overlaps(n.right, interval, acc + lsize + self.span(i), out);
        }
    }

    // ---- structural primitives ----

    fn insert_by_id(&mut self, cur: Option<usize>, idx: usize) -> usize {
        let Some(i) = cur else { return idx };
        if self.node_min_id(idx) < self.node_min_id(i) {
            let l = self.insert_by_id(self.nodes[i].left, idx);
            self.nodes[i].left = Some(l);
        } else {
            let r = self.insert_by_id(self.nodes[i].right, idx);
            self.nodes[i].right = Some(r);
        }
        self.balance(i)
    }

    fn insert_leftmost(&mut self, cur: Option<usize>, idx: usize) -> usize {
        let Some(i) = cur else { return idx };
        let l = self.insert_leftmost(self.nodes[i].left, idx);
        self.nodes[i].left = Some(l);
        self.balance(i)
    }

    fn remove_exact(&mut self, cur: Option<usize>, target: &Identifier) -> Option<usize> {
        let i = cur?;
        let min = self.node_min_id(i);
        if *target < min {
            let l = self.remove_exact(self.nodes[i].left, target);
            self.nodes[i].left = l;
        } else if *target > self.node_max_id(i) {
            let r = self.remove_exact(self.nodes[i].right, target);
            self.nodes[i].right = r;
        } else {
            debug_assert_eq!(*target, min);
            return self.unlink(i);
        }
        Some(self.balance(i))
    }

    /// Detaches node `i` from the tree, returning the replacement subtree.
    /// The node's live elements must already be accounted for.
    fn unlink(&mut self, i: usize) -> Option<usize> {
        let n = self.nodes[i];
        match (n.left, n.right) {
            (None, None) => {
                self.free_node(i);
                None
            }
            (Some(l), None) => {
                self.free_node(i);
                Some(l)
            }
            (None, Some(r)) => {
                self.free_node(i);
                Some(r)
            }
            (Some(_), Some(r)) => {
                // Replace this node's payload with its in-order successor's.
                let (new_right, succ) = self.detach_leftmost(r);
                let sp = self.nodes[succ];
                self.block_refs[sp.block] += 1;
                let old_block = self.nodes[i].block;
                self.release_block_ref(old_block);
                {
                    let node = &mut self.nodes[i];
                    node.block = sp.block;
                    node.offset_begin = sp.offset_begin;
                    node.offset_end = sp.offset_end;
                    node.right = new_right;
                }
                self.free_node(succ);
                Some(self.balance(i))
            }
        }
    }

    fn detach_leftmost(&mut self, i: usize) -> (Option<usize>, usize) {
        match self.nodes[i].left {
            None => (self.nodes[i].right, i),
            Some(l) => {
                let (new_left, leftmost) = self.detach_leftmost(l);
                self.nodes[i].left = new_left;
                (Some(self.balance(i)), leftmost)
            }
        }
    }

    /// Widens the live range of the node holding position `pos` by `delta`
    /// elements, at its end (`at_end`) or its start, updating subtree sizes
    /// on the way down.
    fn extend_at(&mut self, i: usize, pos: usize, delta: usize, at_end: bool) {
        let n = self.nodes[i];
        let lsize = self.size(n.left);
        let span = self.span(i);
        if pos < lsize {
            self.extend_at(n.left.expect("in range"), pos, delta, at_end);
        } else if pos < lsize + span {
            let node = &mut self.nodes[i];
            if at_end {
                node.offset_end += delta as i32;
            } else {
                node.offset_begin -= delta as i32;
            }
        } else {
            self.extend_at(n.right.expect("in range"), pos - lsize - span, delta, at_end);
        }
        self.update(i);
    }

    fn build_balanced(&mut self, runs: &[IdentifierInterval]) -> Option<usize> {
        if runs.is_empty() {
            return None;
        }
        let mid = runs.len() / 2;
        let block = self.alloc_block(Block::new(runs[mid].clone()));
        let idx = self.alloc_node(block, runs[mid].begin(), runs[mid].end());
        self.nodes[idx].left = self.build_balanced(&runs[..mid]);
        self.nodes[idx].right = self.build_balanced(&runs[mid + 1..]);
        self.update(idx);
        Some(idx)
    }

    fn collect_runs(&self, cur: Option<usize>, out: &mut Vec<IdentifierInterval>) {
        let Some(i) = cur else { return };
        let n = &self.nodes[i];
        self.collect_runs(n.left, out);
        let run = self.blocks[n.block]
            .interval()
            .sub(n.offset_begin, n.offset_end);
        match out.last_mut() {
            Some(last) if last.equals_base(&run) && last.end() as i64 + 1 == run.begin() as i64 => {
                *last = last.union(run.begin(), run.end());
            }
            _ => out.push(run),
        }
        self.collect_runs(n.right, out);
    }

    // ---- AVL bookkeeping ----

    fn size(&self, cur: Option<usize>) -> usize {
        cur.map_or(0, |i| self.nodes[i].size)
    }

    fn height(&self, cur: Option<usize>) -> i32 {
        cur.map_or(0, |i| self.nodes[i].height)
    }

    fn span(&self, i: usize) -> usize {
        let n = &self.nodes[i];
        (n.offset_end as i64 - n.offset_begin as i64 + 1) as usize
    }

    fn update(&mut self, i: usize) {
        let n = self.nodes[i];
        let height = 1 + self.height(n.left).max(self.height(n.right));
        let size = self.span(i) + self.size(n.left) + self.size(n.right);
        let node = &mut self.nodes[i];
        node.height = height;
        node.size = size;
    }

    fn balance(&mut self, i: usize) -> usize {
        self.update(i);
        let n = self.nodes[i];
        let bf = self.height(n.left) - self.height(n.right);
        if bf > 1 {
            let l = n.left.expect("left-heavy");
            if self.height(self.nodes[l].left) < self.height(self.nodes[l].right) {
                let rotated = self.rotate_left(l);
                self.nodes[i].left = Some(rotated);
            }
            self.rotate_right(i)
        } else if bf < -1 {
            let r = n.right.expect("right-heavy");
            if self.height(self.nodes[r].right) < self.height(self.nodes[r].left) {
                let rotated = self.rotate_right(r);
                self.nodes[i].right = Some(rotated);
            }
            self.rotate_left(i)
        } else {
            i
        }
    }

    fn rotate_left(&mut self, i: usize) -> usize {
        let r = self.nodes[i].right.expect("rotation pivot");
        self.nodes[i].right = self.nodes[r].left;
        self.nodes[r].left = Some(i);
        self.update(i);
        self.update(r);
        r
    }

    fn rotate_right(&mut self, i: usize) -> usize {
        let l = self.nodes[i].left.expect("rotation pivot");
        self.nodes[i].left = self.nodes[l].right;
        self.nodes[l].right = Some(i);
        self.update(i);
        self.update(l);
        l
    }

    // ---- arenas ----

    fn alloc_node(&mut self, block: usize, offset_begin: i32, offset_end: i32) -> usize {
        self.block_refs[block] += 1;
        let node = RopeNode {
            block,
            offset_begin,
            offset_end,
            left: None,
            right: None,
            height: 1,
            size: (offset_end as i64 - offset_begin as i64 + 1) as usize,
        };
        match self.free_nodes.pop() {
            Some(i) => {
                self.nodes[i] = node;
                i
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn free_node(&mut self, i: usize) {
        let block = self.nodes[i].block;
        self.release_block_ref(block);
        self.free_nodes.push(i);
    }

    fn alloc_block(&mut self, block: Block) -> usize {
        match self.free_blocks.pop() {
            Some(b) => {
                self.blocks[b] = block;
                b
            }
            None => {
                self.blocks.push(block);
                self.block_refs.push(0);
                self.blocks.len() - 1
            }
        }
    }

    fn release_block_ref(&mut self, block: usize) {
        self.block_refs[block] -= 1;
        if self.block_refs[block] == 0 && self.blocks[block].nb_element() == 0 {
            self.free_blocks.push(block);
        }
    }

    // ---- validation ----

    fn check_node(
        &self,
        i: usize,
        lo: Option<&Identifier>,
        hi: Option<&Identifier>,
        live: &mut HashMap<usize, usize>,
    ) -> (i32, usize) {
        let n = self.nodes[i];
        assert!(n.offset_begin <= n.offset_end, "empty live range");
        let block_interval = self.blocks[n.block].interval();
        assert!(
            block_interval.contains(n.offset_begin) && block_interval.contains(n.offset_end),
            "live range escapes its block"
        );
        let min = self.node_min_id(i);
        let max = self.node_max_id(i);
        if let Some(lo) = lo {
            assert!(*lo < min, "binary-search order violated");
        }
        if let Some(hi) = hi {
            assert!(max < *hi, "binary-search order violated");
        }
        *live.entry(n.block).or_insert(0) += self.span(i);

        let (lh, ls) = n
            .left
            .map_or((0, 0), |l| self.check_node(l, lo, Some(&min), live));
        let (rh, rs) = n
            .right
            .map_or((0, 0), |r| self.check_node(r, Some(&max), hi, live));
        assert!((lh - rh).abs() <= 1, "AVL balance violated");
        assert_eq!(n.height, 1 + lh.max(rh), "stale height");
        assert_eq!(n.size, ls + rs + self.span(i), "stale subtree size");
        (n.height, n.size)
    }
}

impl Default for RopeTree {
    fn default() -> Self {
        RopeTree::new()
    }
}

/// Cuts `interval` into maximal sub-runs avoiding already-present offsets
/// and breaking after offsets with interleaved descendants.
fn build_fragments(
    interval: &IdentifierInterval,
    present: &BTreeSet<i32>,
    split_after: &BTreeSet<i32>,
) -> Vec<IdentifierInterval> {
    let mut fragments = Vec::new();
    let mut start: Option<i32> = None;
    for o in interval.begin()..=interval.end() {
        if present.contains(&o) {
            if let Some(s) = start.take() {
                fragments.push(interval.sub(s, o - 1));
            }
            continue;
        }
        if start.is_none() {
            start = Some(o);
        }
        if split_after.contains(&o) && o < interval.end() {
            fragments.push(interval.sub(start.take().unwrap(), o));
        }
    }
    if let Some(s) = start {
        fragments.push(interval.sub(s, interval.end()));
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ids::IdentifierTuple;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn interval(random: i32, replica: i32, clock: i32, begin: i32, end: i32) -> IdentifierInterval {
        IdentifierInterval::new(
            Identifier::from_tuple(IdentifierTuple::new(random, replica, clock, begin)),
            end,
        )
    }

    fn ids_in_order(tree: &RopeTree) -> Vec<Identifier> {
        (0..tree.len()).map(|p| tree.id_at(p).unwrap()).collect()
    }

    #[test]
    fn test_local_inserts_keep_order() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = RopeTree::new();

        tree.insert_local(&mut rng, 0, 3, 1, 0).unwrap();
        tree.insert_local(&mut rng, 1, 2, 1, 1).unwrap();
        tree.insert_local(&mut rng, 5, 1, 1, 2).unwrap();

        assert_eq!(tree.len(), 6);
        tree.check_invariants();
        let ids = ids_in_order(&tree);
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_local_append_extends_block() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut tree = RopeTree::new();

        let first = tree.insert_local(&mut rng, 0, 5, 3, 0).unwrap();
        let second = tree.insert_local(&mut rng, 5, 4, 3, 1).unwrap();

        // Typing at the tail reuses the block's base with higher offsets.
        assert!(first.max_id().equals_base(second.min_id()));
        assert_eq!(second.begin(), first.end() + 1);
        assert_eq!(tree.id_intervals().len(), 1);
        tree.check_invariants();
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut tree = RopeTree::new();
        assert!(tree.insert_local(&mut rng, 1, 1, 1, 0).is_err());
    }

    #[test]
    fn test_remote_insert_and_growth() {
        let mut tree = RopeTree::new();
        let runs = tree.insert_remote(&interval(50, 1, 0, 0, 2));
        assert_eq!(runs, vec![(0, interval(50, 1, 0, 0, 2))]);

        // The abutting continuation grows the same block.
        let runs = tree.insert_remote(&interval(50, 1, 0, 3, 5));
        assert_eq!(runs, vec![(3, interval(50, 1, 0, 3, 5))]);
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.id_intervals().len(), 1);
        tree.check_invariants();
    }

    #[test]
    fn test_remote_insert_fragments_around_descendant() {
        let mut tree = RopeTree::new();
        // A child of offset 0 arrives before its parent run.
        let child = IdentifierInterval::new(
            Identifier::new(vec![
                IdentifierTuple::new(50, 1, 0, 0),
                IdentifierTuple::new(100, 2, 0, 0),
            ]),
            0,
        );
        tree.insert_remote(&child);

        let runs = tree.insert_remote(&interval(50, 1, 0, 0, 2));
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], (0, interval(50, 1, 0, 0, 0)));
        assert_eq!(runs[1], (2, interval(50, 1, 0, 1, 2)));
        assert_eq!(tree.len(), 4);
        tree.check_invariants();

        let ids = ids_in_order(&tree);
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_delete_spanning_blocks() {
        let mut tree = RopeTree::new();
        tree.insert_remote(&interval(10, 1, 0, 0, 4));
        tree.insert_remote(&interval(20, 2, 0, 0, 4));

        let removed = tree.del_local(3, 6).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0], interval(10, 1, 0, 3, 4));
        assert_eq!(removed[1], interval(20, 2, 0, 0, 1));
        assert_eq!(tree.len(), 6);
        tree.check_invariants();
    }

    #[test]
    fn test_interior_delete_splits_node() {
        let mut tree = RopeTree::new();
        tree.insert_remote(&interval(10, 1, 0, 0, 9));

        let removed = tree.del_local(3, 5).unwrap();
        assert_eq!(removed, vec![interval(10, 1, 0, 3, 5)]);
        assert_eq!(tree.len(), 7);
        // Two nodes now share the block.
        assert_eq!(tree.id_intervals().len(), 2);
        tree.check_invariants();

        // The surviving offsets are still addressable.
        assert_eq!(tree.id_at(2).unwrap().last_offset(), 2);
        assert_eq!(tree.id_at(3).unwrap().last_offset(), 6);
    }

    #[test]
    fn test_remote_delete_idempotent() {
        let mut tree = RopeTree::new();
        tree.insert_remote(&interval(10, 1, 0, 0, 4));

        let runs = tree.del_remote(&interval(10, 1, 0, 1, 3));
        assert_eq!(runs, vec![(1, 3)]);
        assert_eq!(tree.len(), 2);

        // Deleting the same interval again is a no-op.
        let runs = tree.del_remote(&interval(10, 1, 0, 1, 3));
        assert!(runs.is_empty());
        assert_eq!(tree.len(), 2);
        tree.check_invariants();
    }

    #[test]
    fn test_remote_delete_unknown_interval() {
        let mut tree = RopeTree::new();
        tree.insert_remote(&interval(10, 1, 0, 0, 4));
        let runs = tree.del_remote(&interval(99, 9, 9, 0, 4));
        assert!(runs.is_empty());
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_many_random_edits_stay_balanced() {
        let mut rng = StdRng::seed_from_u64(10);
        let mut tree = RopeTree::new();
        let mut clock = 0;

        for round in 0..400 {
            let len = tree.len();
            if len == 0 || round % 3 != 0 {
                let pos = if len == 0 { 0 } else { rng.gen_range(0..=len) };
                tree.insert_local(&mut rng, pos, 1 + round % 4, 1, clock).unwrap();
                clock += 1;
            } else {
                let begin = rng.gen_range(0..len);
                let end = (begin + rng.gen_range(0..3)).min(len - 1);
                tree.del_local(begin, end).unwrap();
            }
            tree.check_invariants();
        }

        let ids = ids_in_order(&tree);
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
