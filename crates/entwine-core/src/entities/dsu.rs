//! Disjoint-set union over dense address ids.
//!
//! Addresses are never keyed by string here: the caller maps them to dense
//! indexes against the sorted address table, and the forest is two flat
//! arrays — `u32` parents and `u8` ranks — so the per-address working set
//! stays within a few bytes even at hundreds of millions of addresses.

/// Union-find with path compression and union by rank.
///
/// The representative of a merged set is its highest-rank member; rank ties
/// go to the smaller index, which keeps the structure deterministic for a
/// given union sequence.
pub struct DisjointSet {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl DisjointSet {
    /// A forest of `len` singleton sets. `len` must fit in `u32`.
    pub fn new(len: usize) -> Self {
        assert!(len <= u32::MAX as usize, "element count exceeds u32 ids");
        Self {
            parent: (0..len as u32).collect(),
            rank: vec![0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Representative of `x`'s set. Compresses the walked path.
    pub fn find(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }

        let mut cursor = x;
        while self.parent[cursor as usize] != root {
            let next = self.parent[cursor as usize];
            self.parent[cursor as usize] = root;
            cursor = next;
        }
        root
    }

    /// Merge the sets of `a` and `b`; returns the surviving representative.
    pub fn union(&mut self, a: u32, b: u32) -> u32 {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return root_a;
        }

        let (winner, loser) = match self.rank[root_a as usize].cmp(&self.rank[root_b as usize]) {
            std::cmp::Ordering::Greater => (root_a, root_b),
            std::cmp::Ordering::Less => (root_b, root_a),
            std::cmp::Ordering::Equal => {
                let winner = root_a.min(root_b);
                self.rank[winner as usize] += 1;
                (winner, root_a.max(root_b))
            }
        };
        self.parent[loser as usize] = winner;
        winner
    }
}
