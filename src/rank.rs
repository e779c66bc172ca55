use crate::bits::{high_mask, word_index, word_offset, WORD_BITS};
use crate::bitvec::BitVector;

/// Power of 2 of the superblock size in bits.
const SUPERBLOCK_BITS: u32 = 12;
const SUPERBLOCK_SIZE: usize = 1 << SUPERBLOCK_BITS;
const WORDS_PER_SUPERBLOCK: usize = SUPERBLOCK_SIZE / WORD_BITS;

/// Static two-level rank index over a [`BitVector`].
///
/// Superblocks sample the absolute number of 1-bits every 4096 bits; blocks
/// sample the number of 1-bits since the start of their superblock at every
/// word. A query is two lookups plus one popcount.
///
/// Only used to decode persisted trees, so it owns its bits and is never
/// modified after construction.
#[derive(Clone, Debug)]
pub struct RankIndex {
    bits: BitVector,
    // 1-bits preceding each superblock
    superblocks: Box<[u64]>,
    // 1-bits preceding each word within its superblock; fits in a u16
    // since a superblock has 4096 bits
    blocks: Box<[u16]>,
    num_ones: usize,
}

impl RankIndex {
    pub fn new(bits: BitVector) -> Self {
        let words = bits.data();
        let mut superblocks = Vec::with_capacity(words.len().div_ceil(WORDS_PER_SUPERBLOCK));
        let mut blocks = Vec::with_capacity(words.len());

        let mut rank_bv = 0u64; // 1-bits in the whole vector so far
        let mut rank_sb = 0u16; // 1-bits in the current superblock so far
        for (j, w) in words.iter().enumerate() {
            if j % WORDS_PER_SUPERBLOCK == 0 {
                superblocks.push(rank_bv);
                rank_sb = 0;
            }
            blocks.push(rank_sb);
            let ones = w.count_ones();
            rank_sb += ones as u16;
            rank_bv += ones as u64;
        }

        Self {
            bits,
            superblocks: superblocks.into(),
            blocks: blocks.into(),
            num_ones: rank_bv as usize,
        }
    }

    /// Return the number of 1-bits below `bit_index`
    pub fn rank1(&self, bit_index: usize) -> usize {
        if bit_index >= self.bits.len() {
            return self.num_ones;
        }
        let j = word_index(bit_index);
        let sb = self.superblocks[bit_index >> SUPERBLOCK_BITS] as usize;
        let b = self.blocks[j] as usize;
        let partial = self.bits.data()[j] & high_mask(word_offset(bit_index));
        sb + b + partial.count_ones() as usize
    }

    /// Return the number of 0-bits below `bit_index`
    pub fn rank0(&self, bit_index: usize) -> usize {
        bit_index.min(self.bits.len()) - self.rank1(bit_index)
    }

    pub fn get(&self, bit_index: usize) -> bool {
        assert!(
            bit_index < self.bits.len(),
            "bit index {} cannot exceed length {}",
            bit_index,
            self.bits.len()
        );
        self.bits.get(bit_index)
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn num_ones(&self) -> usize {
        self.num_ones
    }

    pub fn num_zeros(&self) -> usize {
        self.bits.len() - self.num_ones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panics;
    use rand::{Rng, SeedableRng};

    fn naive_rank1(bv: &BitVector, i: usize) -> usize {
        bv.iter().take(i).filter(|&b| b).count()
    }

    #[test]
    fn test_rank_simple() {
        // 1 0 1 1 0 1
        let bv: BitVector = [true, false, true, true, false, true].into_iter().collect();
        let r = RankIndex::new(bv);

        assert_eq!(r.rank1(0), 0);
        assert_eq!(r.rank1(1), 1);
        assert_eq!(r.rank1(2), 1);
        assert_eq!(r.rank1(3), 2);
        assert_eq!(r.rank1(4), 3);
        assert_eq!(r.rank1(5), 3);
        assert_eq!(r.rank1(6), 4);
        assert_eq!(r.rank1(1_000_000), 4);

        assert_eq!(r.rank0(0), 0);
        assert_eq!(r.rank0(2), 1);
        assert_eq!(r.rank0(5), 2);
        assert_eq!(r.rank0(6), 2);
        assert_eq!(r.rank0(1_000_000), 2);
        assert_eq!(r.num_zeros(), 2);
    }

    #[test]
    fn test_empty() {
        let r = RankIndex::new(BitVector::new());
        assert!(r.is_empty());
        assert_eq!(r.rank1(0), 0);
        assert_eq!(r.rank0(10), 0);
        assert!(panics(|| r.get(0)));
    }

    #[test]
    fn test_across_superblocks() {
        // large enough to span several superblocks, with a word-aligned length
        // so that querying at `len` would otherwise read past the last word
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for len in [SUPERBLOCK_SIZE * 3, SUPERBLOCK_SIZE * 3 + 17, 1000] {
            let bv: BitVector = (0..len).map(|_| rng.gen_bool(0.3)).collect();
            let r = RankIndex::new(bv.clone());
            for i in (0..=len).step_by(61).chain([len - 1, len]) {
                assert_eq!(r.rank1(i), naive_rank1(&bv, i), "rank1({})", i);
                assert_eq!(r.rank0(i), i - naive_rank1(&bv, i), "rank0({})", i);
            }
            assert_eq!(r.num_ones(), bv.count_ones());
        }
    }

    #[test]
    fn test_matches_naive_exhaustive() {
        let mut g = exhaustigen::Gen::new();
        while !g.done() {
            let len = g.gen(10);
            let bv: BitVector = (0..len).map(|_| g.gen(1) == 1).collect();
            let r = RankIndex::new(bv.clone());
            for i in 0..=len {
                assert_eq!(r.rank1(i), naive_rank1(&bv, i), "{} rank1({})", bv, i);
                assert_eq!(r.rank0(i), i - naive_rank1(&bv, i), "{} rank0({})", bv, i);
            }
            for i in 0..len {
                assert_eq!(r.get(i), bv.get(i));
            }
        }
    }

    #[test]
    fn test_every_third_bit() {
        let bv: BitVector = (0..1024).map(|i| i % 3 == 0).collect();
        let r = RankIndex::new(bv);
        // 0, 3, 6, ... 510 → 171 ones (0..512, step 3)
        assert_eq!(r.rank1(512), 171);
        assert_eq!(r.rank1(1024), 342);
    }
}
