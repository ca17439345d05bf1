//! Renaming epochs: the forest of identifier schemes.
//!
//! Every rename opens a child epoch whose renaming map translates from the
//! parent's identifier scheme. Translating an operation across epochs walks
//! up from the deeper epoch to the lowest common ancestor through
//! `reverse_rename`, then back down through `rename`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crdt::ids::Identifier;
use crate::crdt::renaming::RenamingMap;

/// Identifier of an epoch: the replica that issued the rename and its clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochId {
    pub replica_number: i32,
    pub clock: i32,
}

impl EpochId {
    pub fn new(replica_number: i32, clock: i32) -> Self {
        EpochId {
            replica_number,
            clock,
        }
    }

    /// The genesis identifier scheme shared by every replica.
    pub fn origin() -> Self {
        EpochId {
            replica_number: 0,
            clock: 0,
        }
    }
}

/// An epoch node: its id plus a weak back-reference to its parent. The root
/// has no parent.
#[derive(Debug, Clone)]
pub struct Epoch {
    pub id: EpochId,
    pub parent: Option<EpochId>,
}

/// The known epochs of a replica, rooted at the genesis scheme.
pub struct EpochTree {
    epochs: HashMap<EpochId, Epoch>,
    maps: HashMap<EpochId, RenamingMap>,
}

impl EpochTree {
    pub fn new() -> Self {
        let origin = Epoch {
            id: EpochId::origin(),
            parent: None,
        };
        let mut epochs = HashMap::new();
        epochs.insert(origin.id, origin);
        EpochTree {
            epochs,
            maps: HashMap::new(),
        }
    }

    pub fn contains(&self, id: EpochId) -> bool {
        self.epochs.contains_key(&id)
    }

    /// Registers a child epoch with the map describing the transition from
    /// `parent` to it.
    pub fn insert(
        &mut self,
        id: EpochId,
        parent: EpochId,
        map: RenamingMap,
    ) -> Result<(), &'static str> {
        if !self.epochs.contains_key(&parent) {
            return Err("parent epoch not known");
        }
        if self.epochs.contains_key(&id) {
            return Err("epoch already known");
        }
        self.epochs.insert(
            id,
            Epoch {
                id,
                parent: Some(parent),
            },
        );
        self.maps.insert(id, map);
        Ok(())
    }

    /// The renaming map attached to a non-root epoch.
    pub fn map(&self, id: EpochId) -> Option<&RenamingMap> {
        self.maps.get(&id)
    }

    fn parent(&self, id: EpochId) -> Option<EpochId> {
        self.epochs.get(&id).and_then(|e| e.parent)
    }

    /// Distance of an epoch from the root.
    pub fn depth(&self, id: EpochId) -> usize {
        let mut depth = 0;
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            depth += 1;
            cur = p;
        }
        depth
    }

    /// Lowest common ancestor of two known epochs, by equal-depth ascent.
    pub fn lca(&self, a: EpochId, b: EpochId) -> EpochId {
        let mut a = a;
        let mut b = b;
        let mut da = self.depth(a);
        let mut db = self.depth(b);
        while da > db {
            a = self.parent(a).expect("depth accounted for");
            da -= 1;
        }
        while db > da {
            b = self.parent(b).expect("depth accounted for");
            db -= 1;
        }
        while a != b {
            a = self.parent(a).expect("root is shared");
            b = self.parent(b).expect("root is shared");
        }
        a
    }

    /// Translates an identifier from one known epoch's scheme into
    /// another's, composing renaming maps along the tree path.
    pub fn translate(&self, id: &Identifier, from: EpochId, to: EpochId) -> Identifier {
        if from == to {
            return id.clone();
        }
        let lca = self.lca(from, to);
        let mut current = id.clone();

        let mut epoch = from;
        while epoch != lca {
            let map = self.maps.get(&epoch).expect("non-root epochs carry a map");
            current = map.reverse_rename(&current);
            epoch = self.parent(epoch).expect("lca is an ancestor");
        }

        let mut descent = Vec::new();
        let mut epoch = to;
        while epoch != lca {
            descent.push(epoch);
            epoch = self.parent(epoch).expect("lca is an ancestor");
        }
        for epoch in descent.iter().rev() {
            let map = self.maps.get(epoch).expect("non-root epochs carry a map");
            current = map.rename(&current);
        }
        current
    }

    /// The epoch every replica converges on: deepest first, ties broken by
    /// the issuing `(replica_number, clock)`.
    pub fn best_epoch(&self) -> EpochId {
        self.epochs
            .keys()
            .copied()
            .max_by_key(|&id| (self.depth(id), id))
            .expect("the origin epoch always exists")
    }
}

impl Default for EpochTree {
    fn default() -> Self {
        EpochTree::new()
    }
}
