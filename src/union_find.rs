// 🔗 Union-Find over RecordIds
//
// Arena of parent pointers indexed by RecordId. Path halving + union by rank
// gives near-constant amortized find/union. The root chosen by `union` is an
// internal detail: callers map roots to masters, never roots to meaning.

use std::collections::BTreeMap;

use crate::records::RecordId;

#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    parent: Vec<RecordId>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(len: usize) -> Self {
        let mut uf = UnionFind::default();
        uf.grow(len);
        uf
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Extend to `len` elements; new ones are singletons
    pub fn grow(&mut self, len: usize) {
        while self.parent.len() < len {
            let id = self.parent.len() as RecordId;
            self.parent.push(id);
            self.rank.push(0);
        }
    }

    pub fn find(&mut self, mut x: RecordId) -> RecordId {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    /// Root lookup without path compression
    pub fn find_immutable(&self, mut x: RecordId) -> RecordId {
        while self.parent[x as usize] != x {
            x = self.parent[x as usize];
        }
        x
    }

    /// Merge the classes of `a` and `b`; returns the new root, or None if
    /// they were already together
    pub fn union(&mut self, a: RecordId, b: RecordId) -> Option<RecordId> {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return None;
        }
        let (root, child) = match self.rank[ra as usize].cmp(&self.rank[rb as usize]) {
            std::cmp::Ordering::Less => (rb, ra),
            std::cmp::Ordering::Greater => (ra, rb),
            std::cmp::Ordering::Equal => {
                self.rank[ra as usize] += 1;
                (ra, rb)
            }
        };
        self.parent[child as usize] = root;
        Some(root)
    }

    pub fn same(&mut self, a: RecordId, b: RecordId) -> bool {
        self.find(a) == self.find(b)
    }

    /// Members of the class containing `x`, ascending
    pub fn members(&mut self, x: RecordId) -> Vec<RecordId> {
        let root = self.find(x);
        (0..self.len() as RecordId)
            .filter(|&i| self.find(i) == root)
            .collect()
    }

    /// Every class keyed by root, members ascending
    pub fn classes(&mut self) -> BTreeMap<RecordId, Vec<RecordId>> {
        let mut classes: BTreeMap<RecordId, Vec<RecordId>> = BTreeMap::new();
        for i in 0..self.len() as RecordId {
            let root = self.find(i);
            classes.entry(root).or_default().push(i);
        }
        classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_union_and_find() {
        let mut uf = UnionFind::new(5);
        assert!(!uf.same(0, 1));
        assert!(uf.union(0, 1).is_some());
        assert!(uf.union(1, 0).is_none());
        assert!(uf.same(0, 1));
        assert_eq!(uf.members(1), vec![0, 1]);
        assert_eq!(uf.classes().len(), 4);
    }

    #[test]
    fn test_transitive_merge() {
        let mut uf = UnionFind::new(3);
        uf.union(0, 1);
        uf.union(1, 2);
        assert!(uf.same(0, 2));
    }

    #[test]
    fn test_grow_keeps_existing_classes() {
        let mut uf = UnionFind::new(2);
        uf.union(0, 1);
        uf.grow(4);
        assert_eq!(uf.len(), 4);
        assert!(uf.same(0, 1));
        assert!(!uf.same(2, 3));
        assert_eq!(uf.find_immutable(3), 3);
    }

    proptest! {
        #[test]
        fn prop_classes_partition_universe(
            n in 1usize..60,
            edges in prop::collection::vec((0u32..60, 0u32..60), 0..120),
        ) {
            let mut uf = UnionFind::new(n);
            for (a, b) in edges {
                let (a, b) = (a % n as u32, b % n as u32);
                uf.union(a, b);
            }
            let classes = uf.classes();
            let mut seen: Vec<RecordId> = classes.values().flatten().copied().collect();
            seen.sort();
            let expected: Vec<RecordId> = (0..n as u32).collect();
            prop_assert_eq!(seen, expected);
        }

        #[test]
        fn prop_union_is_transitive_and_order_free(
            n in 2usize..40,
            edges in prop::collection::vec((0u32..40, 0u32..40), 0..80),
        ) {
            let edges: Vec<(u32, u32)> = edges.into_iter().map(|(a, b)| (a % n as u32, b % n as u32)).collect();

            let mut forward = UnionFind::new(n);
            for &(a, b) in &edges {
                forward.union(a, b);
            }
            let mut backward = UnionFind::new(n);
            for &(a, b) in edges.iter().rev() {
                backward.union(b, a);
            }

            for &(a, b) in &edges {
                prop_assert!(forward.same(a, b));
            }
            for x in 0..n as u32 {
                for y in 0..n as u32 {
                    prop_assert_eq!(forward.same(x, y), backward.same(x, y));
                }
            }
        }
    }
}
