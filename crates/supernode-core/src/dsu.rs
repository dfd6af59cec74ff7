//! Union-Find (disjoint set union) over a fixed universe of node ids.
//!
//! One reusable engine serves both live merging and replay: `union` and
//! `groups` operate on the current partition, while `snapshot`/`restore`
//! capture and reinstate the full parent array in fully-rooted form so a
//! restored engine reproduces identical groupings.
//!
//! The engine itself enforces no size caps; the orchestrator checks group
//! sizes before committing a union.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, SupernodeError};

/// Disjoint sets with path compression (pointer halving) and union by size.
#[derive(Debug, Clone)]
pub struct UnionFind {
    ids: Vec<String>,
    index_of: HashMap<String, usize>,
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    /// Create singleton sets over the given id universe. The universe is
    /// fixed for the lifetime of the engine.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        let index_of = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let n = ids.len();
        Self {
            ids,
            index_of,
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    /// Number of tracked ids.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the universe is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Id at the given dense index.
    #[inline]
    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    /// Dense index of an id, if tracked.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index_of.get(id).copied()
    }

    /// Representative of the set containing `x`, with pointer-halving
    /// compression. Idempotent: `find(find(x)) == find(x)`.
    pub fn find(&mut self, x: usize) -> usize {
        let mut i = x;
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Representative of the set containing `x` without mutating the
    /// structure. Same result as [`find`](Self::find); used by read-only
    /// views of a frozen engine.
    pub fn resolve(&self, x: usize) -> usize {
        let mut i = x;
        while self.parent[i] != i {
            i = self.parent[i];
        }
        i
    }

    /// Representative lookup by id. `None` for untracked ids.
    pub fn find_id(&mut self, id: &str) -> Option<usize> {
        self.index_of(id).map(|i| self.find(i))
    }

    /// Member count of the set containing `x`.
    pub fn group_size(&self, x: usize) -> usize {
        self.size[self.resolve(x)]
    }

    /// Merge the sets containing `a` and `b`.
    ///
    /// Returns `false` (no-op) when they already share a representative.
    /// Otherwise the smaller set's root is attached under the larger
    /// set's root (ties attach `b`'s root under `a`'s) and the surviving
    /// root's size is updated.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let mut ra = self.find(a);
        let mut rb = self.find(b);
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }

    /// Current partition as representative index → member indices.
    ///
    /// Member lists are in ascending index order and the map is ordered by
    /// representative, so iteration is deterministic.
    pub fn groups(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut result: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.len() {
            result.entry(self.resolve(i)).or_default().push(i);
        }
        result
    }

    /// Parent array fully resolved to final representatives.
    ///
    /// The rooted form (never raw, possibly half-compressed parents) is
    /// what makes a later [`restore`](Self::restore) reproduce identical
    /// grouping.
    pub fn snapshot(&self) -> Vec<usize> {
        (0..self.len()).map(|i| self.resolve(i)).collect()
    }

    /// Replace internal state from a previously captured snapshot and
    /// recompute size bookkeeping from scratch. Used for replay only.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the snapshot does not match the id
    /// universe or is not in rooted form.
    pub fn restore(&mut self, parents: &[usize]) -> Result<()> {
        if parents.len() != self.len() {
            return Err(SupernodeError::Validation(format!(
                "snapshot length {} does not match universe size {}",
                parents.len(),
                self.len()
            )));
        }
        for (i, &p) in parents.iter().enumerate() {
            if p >= self.len() {
                return Err(SupernodeError::Validation(format!(
                    "snapshot parent {p} at index {i} is out of bounds"
                )));
            }
            if parents[p] != p {
                return Err(SupernodeError::Validation(format!(
                    "snapshot is not rooted: parent of {i} is {p}, whose parent is {}",
                    parents[p]
                )));
            }
        }
        self.parent = parents.to_vec();
        let mut size = vec![0usize; self.len()];
        for &p in parents {
            size[p] += 1;
        }
        // Non-root entries keep size 1; only roots carry group sizes.
        for (i, s) in size.iter_mut().enumerate() {
            if parents[i] != i {
                *s = 1;
            }
        }
        self.size = size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> UnionFind {
        UnionFind::new(["a", "b", "c"])
    }

    #[test]
    fn singletons_at_construction() {
        let mut uf = abc();
        assert_eq!(uf.len(), 3);
        assert_ne!(uf.find_id("a"), uf.find_id("b"));
        assert_eq!(uf.groups().len(), 3);
        assert_eq!(uf.index_of("missing"), None);
    }

    #[test]
    fn union_merges_and_tracks_size() {
        let mut uf = abc();
        assert!(uf.union(0, 1));
        assert_eq!(uf.find(0), uf.find(1));
        assert_eq!(uf.group_size(0), 2);
        assert!(uf.union(1, 2));
        assert_eq!(uf.group_size(0), 3);
    }

    #[test]
    fn repeated_union_is_a_noop() {
        let mut uf = abc();
        assert!(uf.union(0, 1));
        assert!(!uf.union(0, 1), "second union of same pair must return false");
        assert!(!uf.union(1, 0));
    }

    #[test]
    fn find_is_idempotent_under_arbitrary_unions() {
        let mut uf = UnionFind::new((0..32).map(|i| format!("n{i}")));
        for step in 0..31usize {
            uf.union(step, (step * 7 + 3) % 32);
        }
        for i in 0..32 {
            let r = uf.find(i);
            assert_eq!(uf.find(r), r, "find(find({i})) must equal find({i})");
        }
    }

    #[test]
    fn groups_partition_the_universe() {
        let mut uf = UnionFind::new((0..10).map(|i| format!("n{i}")));
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(5, 6);
        let groups = uf.groups();
        let mut seen: Vec<usize> = groups.values().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>(), "every id exactly once");
        for (root, members) in &groups {
            assert!(members.contains(root), "root must be a member of its group");
        }
    }

    #[test]
    fn union_by_size_attaches_smaller_under_larger() {
        let mut uf = UnionFind::new((0..5).map(|i| format!("n{i}")));
        uf.union(0, 1);
        uf.union(0, 2); // {0,1,2}
        // Merging singleton 3 into the big set must keep the big set's root.
        let big_root = uf.find(0);
        assert!(uf.union(3, 0));
        assert_eq!(uf.find(3), big_root);
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut uf = UnionFind::new((0..8).map(|i| format!("n{i}")));
        uf.union(0, 1);
        uf.union(2, 3);
        uf.union(0, 2);
        let snap = uf.snapshot();
        let expected = uf.groups();

        let mut fresh = UnionFind::new((0..8).map(|i| format!("n{i}")));
        fresh.restore(&snap).expect("restore must accept own snapshot");
        assert_eq!(fresh.groups(), expected);
        assert_eq!(fresh.group_size(1), 4, "sizes must be recomputed");
    }

    #[test]
    fn snapshot_is_fully_rooted() {
        let mut uf = UnionFind::new((0..6).map(|i| format!("n{i}")));
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(2, 3);
        let snap = uf.snapshot();
        for &p in &snap {
            assert_eq!(snap[p], p, "every parent entry must be a root");
        }
    }

    #[test]
    fn resolve_agrees_with_find_without_mutation() {
        let mut uf = UnionFind::new((0..16).map(|i| format!("n{i}")));
        for i in 0..15usize {
            uf.union(i, (i * 5 + 1) % 16);
        }
        for i in 0..16 {
            let expected = uf.resolve(i);
            assert_eq!(uf.find(i), expected);
        }
    }

    #[test]
    fn restore_rejects_bad_snapshots() {
        let mut uf = abc();
        assert!(uf.restore(&[0, 0]).is_err(), "wrong length");
        assert!(uf.restore(&[0, 9, 2]).is_err(), "out of bounds");
        assert!(uf.restore(&[1, 2, 2]).is_err(), "not rooted");
        assert!(uf.restore(&[0, 0, 2]).is_ok());
    }
}
