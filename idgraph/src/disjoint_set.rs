//! Union-find registry over copyable handles.
//!
//! Unlike a classic parent-pointer union-find, every set keeps its member list so that
//! groups can be enumerated and iterated in a deterministic order. Each entry maps
//! directly to its current set, so `find` is a single lookup. Set handles held by
//! callers can go stale after a union; [`DisjointSets::resolve`] maps them to the set
//! that absorbed them.

use std::hash::Hash;

use derive_more::Display;
use indexmap::{IndexMap, IndexSet};

/// Handle to one set of a [`DisjointSets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("s{_0}")]
pub struct SetId(u32);

impl SetId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct DisjointSets<T> {
    entry_set: IndexMap<T, SetId>,
    /// Member lists; slots of absorbed sets are left empty.
    sets: Vec<IndexSet<T>>,
    /// Absorbed set -> the set it was merged into. Live sets point at themselves.
    parent: Vec<SetId>,
    live: usize,
}

impl<T> Default for DisjointSets<T> {
    fn default() -> Self {
        Self { entry_set: IndexMap::new(), sets: Vec::new(), parent: Vec::new(), live: 0 }
    }
}

impl<T: Copy + Eq + Hash> DisjointSets<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entry` as a singleton if unseen. Returns its set and whether it was created.
    pub fn initialize(&mut self, entry: T) -> (SetId, bool) {
        if let Some(set) = self.entry_set.get(&entry) {
            return (*set, false);
        }
        let set = SetId(self.sets.len() as u32);
        self.sets.push(IndexSet::from([entry]));
        self.parent.push(set);
        self.entry_set.insert(entry, set);
        self.live += 1;
        (set, true)
    }

    pub fn find(&self, entry: &T) -> Option<SetId> {
        self.entry_set.get(entry).copied()
    }

    pub fn contains(&self, entry: &T) -> bool {
        self.entry_set.contains_key(entry)
    }

    /// Follow absorptions until reaching a live set.
    pub fn resolve(&self, mut set: SetId) -> SetId {
        while self.parent[set.index()] != set {
            set = self.parent[set.index()];
        }
        set
    }

    /// Members of `set` (resolved first), in insertion order.
    pub fn members(&self, set: SetId) -> &IndexSet<T> {
        &self.sets[self.resolve(set).index()]
    }

    /// `a == b`, or both are registered in the same set.
    pub fn are_grouped(&self, a: &T, b: &T) -> bool {
        a == b || matches!((self.find(a), self.find(b)), (Some(sa), Some(sb)) if sa == sb)
    }

    /// Merge the sets of `a` and `b`, registering either if unseen.
    ///
    /// Returns `(survivor, absorbed)`, or `None` if they were already together. The larger
    /// set survives; on a tie the set of `a` does.
    pub fn union(&mut self, a: T, b: T) -> Option<(SetId, SetId)> {
        let (sa, _) = self.initialize(a);
        let (sb, _) = self.initialize(b);
        if sa == sb {
            return None;
        }

        let (survivor, absorbed) =
            if self.sets[sb.index()].len() > self.sets[sa.index()].len() { (sb, sa) } else { (sa, sb) };

        let moved = std::mem::take(&mut self.sets[absorbed.index()]);
        for entry in &moved {
            self.entry_set.insert(*entry, survivor);
        }
        self.sets[survivor.index()].extend(moved);
        self.parent[absorbed.index()] = survivor;
        self.live -= 1;
        Some((survivor, absorbed))
    }

    /// Live sets in creation order.
    pub fn sets(&self) -> impl Iterator<Item = (SetId, &IndexSet<T>)> {
        self.sets
            .iter()
            .enumerate()
            .filter(|(_, members)| !members.is_empty())
            .map(|(index, members)| (SetId(index as u32), members))
    }

    /// Registered entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &T> {
        self.entry_set.keys()
    }

    /// Number of live sets.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
