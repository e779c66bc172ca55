//! Shape of the complete binary tree and the sizes of its nodes.
//!
//! Nodes are numbered 1-based in level order: the root is node 1 and node
//! `v` has children `2v` and `2v + 1`. Level `l` holds nodes
//! `2^l .. 2^(l+1)`, and a node at level `l` examines bit `h - 1 - l` of
//! the effective code.

use std::ops::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeShape {
    height: usize,
}

impl TreeShape {
    pub fn new(height: usize) -> Self {
        assert!(height < 64, "tree height {} too large", height);
        Self { height }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of internal nodes, `2^h - 1`.
    pub fn num_nodes(&self) -> usize {
        (1 << self.height) - 1
    }

    /// Number of distinct codes a tree of this height can hold.
    pub fn num_codes(&self) -> usize {
        1 << self.height
    }

    /// Node ids at `level`.
    pub fn level_nodes(&self, level: usize) -> Range<usize> {
        debug_assert!(level < self.height);
        (1 << level)..(2 << level)
    }

    pub fn level_of(&self, node: usize) -> usize {
        debug_assert!(node >= 1);
        node.ilog2() as usize
    }

    /// Index within its level of the node that `code` passes through.
    #[inline]
    pub fn node_in_level(&self, level: usize, code: u64) -> usize {
        (code >> (self.height - level)) as usize
    }

    /// The bit of `code` examined at `level`.
    #[inline]
    pub fn bit(&self, level: usize, code: u64) -> bool {
        (code >> (self.height - 1 - level)) & 1 == 1
    }
}

/// Bit-vector lengths of every node of a tree.
///
/// Stored as one array over node ids `1 .. 2^(h+1)`: ids from `2^h` on are
/// the leaves, one per code, holding the code's count. Every inner node's
/// size is the sum of its children's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSizes {
    shape: TreeShape,
    sizes: Vec<u64>,
}

impl NodeSizes {
    /// Aggregate per-code counts upwards, level by level.
    pub fn from_code_counts(shape: TreeShape, counts: &[u64]) -> Self {
        let leaves = shape.num_codes();
        assert!(
            counts.len() <= leaves,
            "{} codes do not fit a tree of height {}",
            counts.len(),
            shape.height()
        );
        // codes past the alphabet are padding and count as 0
        let mut sizes = vec![0; 2 * leaves];
        sizes[leaves..leaves + counts.len()].copy_from_slice(counts);
        for v in (1..leaves).rev() {
            sizes[v] = sizes[2 * v] + sizes[2 * v + 1];
        }
        Self { shape, sizes }
    }

    /// Rebuild from the internal node sizes in level order (ids `1 .. 2^h`).
    pub fn from_internal(shape: TreeShape, internal: &[u64]) -> Self {
        assert_eq!(internal.len(), shape.num_nodes());
        let mut sizes = vec![0; shape.num_codes()];
        sizes[1..].copy_from_slice(internal);
        Self { shape, sizes }
    }

    pub fn shape(&self) -> TreeShape {
        self.shape
    }

    pub fn node(&self, v: usize) -> u64 {
        self.sizes[v]
    }

    /// Sizes of the nodes at `level`, left to right.
    pub fn level(&self, level: usize) -> &[u64] {
        &self.sizes[self.shape.level_nodes(level)]
    }

    /// Sizes of all internal nodes in level order.
    pub fn internal(&self) -> &[u64] {
        &self.sizes[1..self.shape.num_codes()]
    }

    /// Start of each node at `level` within the level's concatenation.
    pub fn level_offsets(&self, level: usize) -> Vec<u64> {
        self.level(level)
            .iter()
            .scan(0, |acc, &s| {
                let start = *acc;
                *acc += s;
                Some(start)
            })
            .collect()
    }
}
