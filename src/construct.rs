//! Node-local tree construction by prefix counting.
//!
//! One fused parallel pass over the shard counts every code and writes the
//! root bits. Node sizes for all levels follow from the counts without
//! touching the text again. Then every level below the root is filled by its
//! own scan of the shard; levels run in parallel but each is scanned by a
//! single task, so bits land in each node in shard order.

use crate::bits::{bit_mask, word_index, WORD_BITS};
use crate::bitvec::BitVector;
use crate::error::{Error, Result};
use crate::tree::{NodeSizes, TreeShape};
use rayon::prelude::*;

/// Bit vectors of every internal node, restricted to one worker's shard.
#[derive(Clone, Debug)]
pub struct NodeBits {
    shape: TreeShape,
    // levels[l][i] is node 2^l + i
    levels: Vec<Vec<BitVector>>,
}

impl NodeBits {
    pub fn shape(&self) -> TreeShape {
        self.shape
    }

    pub fn level(&self, level: usize) -> &[BitVector] {
        &self.levels[level]
    }

    /// Bit vector of node `v` (1-based, level order).
    pub fn node(&self, v: usize) -> &BitVector {
        let level = self.shape.level_of(v);
        &self.levels[level][v - (1 << level)]
    }

    /// Move the bit vectors of `level` out, leaving empty ones behind.
    pub fn take_level(&mut self, level: usize) -> Vec<BitVector> {
        let n = self.levels[level].len();
        std::mem::replace(&mut self.levels[level], vec![BitVector::new(); n])
    }

    /// Lengths of all nodes in level order. Taken levels report zeros.
    pub fn local_sizes(&self) -> Vec<u64> {
        self.levels
            .iter()
            .flatten()
            .map(|bv| bv.len() as u64)
            .collect()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.levels.iter().flatten().map(BitVector::size_in_bytes).sum()
    }
}

/// Build the node bit vectors of a tree of height `height` over `codes`.
///
/// Every code must be below `2^height`.
pub fn build(codes: &[u64], height: usize) -> Result<NodeBits> {
    if height < 1 {
        return Err(Error::InvalidHeight(height));
    }
    let shape = TreeShape::new(height);
    let num_codes = shape.num_codes();
    if let Some(&bad) = codes.par_iter().find_any(|&&c| c >= num_codes as u64) {
        return Err(Error::InvalidConfig(format!(
            "code {} does not fit a tree of height {}",
            bad, height
        )));
    }

    // Count codes and write the root bits in one pass. Each task owns a
    // disjoint run of root words and the symbols that map onto them, and
    // there is one task and one count array per thread.
    let mut root = BitVector::zeros(codes.len());
    let task_words = root
        .data()
        .len()
        .div_ceil(rayon::current_num_threads())
        .max(1);
    let counts = root
        .data_mut()
        .par_chunks_mut(task_words)
        .zip(codes.par_chunks(task_words * WORD_BITS))
        .map(|(words, chunk)| {
            let mut counts = vec![0u64; num_codes];
            for (k, &c) in chunk.iter().enumerate() {
                counts[c as usize] += 1;
                if shape.bit(0, c) {
                    words[word_index(k)] |= bit_mask(k);
                }
            }
            counts
        })
        .reduce_with(|mut a, b| {
            a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
            a
        })
        .unwrap_or_else(|| vec![0u64; num_codes]);

    let sizes = NodeSizes::from_code_counts(shape, &counts);
    let mut levels: Vec<Vec<BitVector>> = (0..height)
        .map(|level| {
            if level == 0 {
                Vec::new()
            } else {
                sizes
                    .level(level)
                    .iter()
                    .map(|&n| BitVector::zeros(n as usize))
                    .collect()
            }
        })
        .collect();
    levels[0].push(root);

    // One task per level. The per-node counters are private to the task.
    levels[1..]
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, nodes)| {
            let level = i + 1;
            let mut fill = vec![0usize; nodes.len()];
            for &c in codes {
                let j = shape.node_in_level(level, c);
                if shape.bit(level, c) {
                    nodes[j].set(fill[j], true);
                }
                fill[j] += 1;
            }
        });

    Ok(NodeBits { shape, levels })
}
