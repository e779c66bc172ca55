//! Node-to-level redistribution.
//!
//! After local construction each worker holds, for every node, the bits of
//! its own shard. Globally, level `l` is the concatenation of its nodes in
//! node order, and within a node the concatenation of the workers' pieces in
//! rank order. The merge moves every piece to the workers owning the
//! matching range of the level, so that worker `r` ends up with bits
//! `[r*B, min((r+1)*B, N))` of each level.
//!
//! Messages carry a two-word header, the global start offset and the bit
//! count, followed by the bits packed MSB-first.

use crate::bits::{copy_bits, packed_len, WORD_BITS};
use crate::bitvec::BitVector;
use crate::comm::{Communicator, Outbox, Payload, Tag};
use crate::construct::NodeBits;
use crate::error::{Error, Result};
use crate::memory::AllocTracker;
use crate::partition::Partition;
use crate::tree::NodeSizes;
use rayon::prelude::*;
use std::ops::Range;
use tracing::{debug, info, trace};

/// Destination words written by one task during write-back.
const WRITE_CHUNK_WORDS: usize = 1 << 12;

const HEADER_WORDS: usize = 2;

/// One worker's contiguous slice of every tree level.
#[derive(Clone, Debug)]
pub struct LevelBits {
    partition: Partition,
    levels: Vec<BitVector>,
}

impl LevelBits {
    pub fn new(partition: Partition, levels: Vec<BitVector>) -> Self {
        Self { partition, levels }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn levels(&self) -> &[BitVector] {
        &self.levels
    }

    pub fn level(&self, level: usize) -> &BitVector {
        &self.levels[level]
    }

    /// Total number of bits held, over all levels.
    pub fn num_bits(&self) -> usize {
        self.levels.iter().map(BitVector::len).sum()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub bytes_sent: usize,
    pub messages_sent: usize,
    pub messages_received: usize,
}

/// A received piece of a level, positioned relative to this worker's range.
#[derive(Debug)]
pub(crate) struct Fragment {
    offset: usize,
    len: usize,
    payload: Payload,
}

impl Fragment {
    fn bits(&self) -> &[u64] {
        &self.payload[HEADER_WORDS..]
    }

    fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Redistribute `nodes` into per-worker level ranges.
///
/// `global` holds the sizes of every node over the whole input, identical on
/// all workers. With `discard`, each level's node bit vectors are released
/// as soon as their bits are on the way.
pub fn merge<C: Communicator>(
    comm: &C,
    nodes: &mut NodeBits,
    global: &NodeSizes,
    partition: &Partition,
    tracker: &AllocTracker,
    discard: bool,
) -> Result<(LevelBits, MergeStats)> {
    let shape = nodes.shape();
    let height = shape.height();
    let mut stats = MergeStats::default();

    if comm.is_master() {
        info!("Distributing node prefix sums ...");
    }
    // Where this worker's piece of each node starts within the node.
    let mut prefix = nodes.local_sizes();
    comm.ex_scan(&mut prefix)?;

    // The root already matches the input partition.
    let root = if discard {
        let mut root = nodes.take_level(0);
        root.pop().unwrap_or_default()
    } else {
        nodes.level(0)[0].clone()
    };
    if root.len() != partition.local_num() {
        return Err(Error::Protocol(format!(
            "root holds {} bits, expected {}",
            root.len(),
            partition.local_num()
        )));
    }
    if !discard {
        tracker.track_alloc(root.size_in_bytes());
    }
    let mut levels = vec![root];

    for level in 1..height {
        if comm.is_master() {
            info!("Merging level {} of {} ...", level, height - 1);
        }
        let tag = Tag::level(level);
        let mut outbox = Outbox::new(tracker);

        {
            let taken: Vec<BitVector>;
            let src: &[BitVector] = if discard {
                taken = nodes.take_level(level);
                &taken
            } else {
                nodes.level(level)
            };

            let offsets = global.level_offsets(level);
            for (i, (bv, v)) in src.iter().zip(shape.level_nodes(level)).enumerate() {
                let start = offsets[i] as usize + prefix[v - 1] as usize;
                send_node(comm, &mut outbox, tag, bv, start, partition)?;
            }

            if discard {
                let bytes: usize = src.iter().map(BitVector::size_in_bytes).sum();
                tracker.track_free(bytes);
            }
        }
        stats.messages_sent += outbox.num_messages();

        let fragments = receive_level(comm, tag, partition)?;
        stats.messages_received += fragments.len();
        debug!(level, fragments = fragments.len(), "received level");

        let mut dest = BitVector::zeros(partition.local_num());
        write_back(&mut dest, &fragments);
        tracker.track_alloc(dest.size_in_bytes());
        levels.push(dest);
        drop(fragments);

        stats.bytes_sent += outbox.complete(comm)?;
    }

    Ok((LevelBits::new(*partition, levels), stats))
}

/// Split one node's local bits, starting at global level offset `start`,
/// at worker boundaries and queue each piece for its owner.
fn send_node<C: Communicator>(
    comm: &C,
    outbox: &mut Outbox,
    tag: Tag,
    bv: &BitVector,
    start: usize,
    partition: &Partition,
) -> Result<()> {
    let end = start + bv.len();
    if end > partition.total_size() {
        return Err(Error::Protocol(format!(
            "node piece [{}, {}) exceeds level length {}",
            start,
            end,
            partition.total_size()
        )));
    }
    let mut pos = start;
    while pos < end {
        let dest = partition.owner_of(pos);
        let next = end.min(partition.range_of(dest).end);
        let len = next - pos;

        let mut msg = vec![0; HEADER_WORDS + packed_len(len)];
        msg[0] = pos as u64;
        msg[1] = len as u64;
        copy_bits(bv.data(), pos - start, &mut msg[HEADER_WORDS..], 0, len);
        trace!(dest, pos, len, "send fragment");
        outbox.send(comm, dest, tag, msg)?;

        pos = next;
    }
    Ok(())
}

/// Receive fragments tagged `tag` until this worker's whole range is
/// covered. Fragments are returned sorted by offset.
pub(crate) fn receive_level<C: Communicator>(
    comm: &C,
    tag: Tag,
    partition: &Partition,
) -> Result<Vec<Fragment>> {
    let range = partition.local_range();
    let expected = range.len();
    let mut received = 0;
    let mut fragments = Vec::new();

    while received < expected {
        let status = comm.probe(tag)?;
        let payload = comm.recv(status.source, tag)?;
        let fragment = parse_fragment(payload, &range)?;
        trace!(
            source = status.source,
            offset = fragment.offset,
            len = fragment.len,
            "recv fragment"
        );
        received += fragment.len;
        if received > expected {
            return Err(Error::Protocol(format!(
                "received {} bits for a range of {}",
                received, expected
            )));
        }
        fragments.push(fragment);
    }

    fragments.sort_unstable_by_key(|f| f.offset);
    for pair in fragments.windows(2) {
        if pair[0].end() > pair[1].offset {
            return Err(Error::Protocol(format!(
                "fragments at {} and {} overlap",
                pair[0].offset, pair[1].offset
            )));
        }
    }
    Ok(fragments)
}

fn parse_fragment(payload: Payload, range: &Range<usize>) -> Result<Fragment> {
    if payload.len() < HEADER_WORDS {
        return Err(Error::Protocol(format!(
            "message of {} words has no header",
            payload.len()
        )));
    }
    let start = payload[0] as usize;
    let len = payload[1] as usize;
    if payload.len() != HEADER_WORDS + packed_len(len) {
        return Err(Error::Protocol(format!(
            "message of {} words cannot carry {} bits",
            payload.len(),
            len
        )));
    }
    if start < range.start || start + len > range.end {
        return Err(Error::Protocol(format!(
            "fragment [{}, {}) outside owned range {:?}",
            start,
            start + len,
            range
        )));
    }
    Ok(Fragment {
        offset: start - range.start,
        len,
        payload,
    })
}

/// Write sorted, disjoint fragments into `dest` in parallel.
///
/// The destination words are split into chunks and each chunk copies the
/// parts of the fragments that fall inside it, so no word is written by two
/// tasks.
fn write_back(dest: &mut BitVector, fragments: &[Fragment]) {
    let len = dest.len();
    dest.data_mut()
        .par_chunks_mut(WRITE_CHUNK_WORDS)
        .enumerate()
        .for_each(|(c, words)| {
            let lo = c * WRITE_CHUNK_WORDS * WORD_BITS;
            let hi = (lo + words.len() * WORD_BITS).min(len);
            let first = fragments.partition_point(|f| f.end() <= lo);
            for f in fragments[first..].iter().take_while(|f| f.offset < hi) {
                let a = f.offset.max(lo);
                let b = f.end().min(hi);
                copy_bits(f.bits(), a - f.offset, words, a - lo, b - a);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::build;
    use crate::local::LocalCluster;
    use crate::tree::TreeShape;
    use rand::{Rng, SeedableRng};
    use testresult::TestResult;

    fn concat<'a>(parts: impl IntoIterator<Item = &'a BitVector>) -> BitVector {
        parts.into_iter().flat_map(|bv| bv.iter()).collect()
    }

    /// Merge `codes` on `workers` workers and return each worker's levels.
    fn run_merge(
        codes: &[u64],
        height: usize,
        workers: usize,
        discard: bool,
    ) -> Result<Vec<LevelBits>> {
        LocalCluster::new(workers).run(|comm| {
            let partition = Partition::new(codes.len(), workers, comm.rank());
            let mut nodes = build(&codes[partition.local_range()], height)?;
            let mut global = nodes.local_sizes();
            comm.all_reduce_sum(&mut global)?;
            let global = NodeSizes::from_internal(TreeShape::new(height), &global);
            let tracker = AllocTracker::new();
            let (levels, stats) =
                merge(comm, &mut nodes, &global, &partition, &tracker, discard)?;
            if discard {
                assert_eq!(nodes.size_in_bytes(), 0);
            }
            // every message sent anywhere is received somewhere
            let mut counts = [stats.messages_sent as u64, stats.messages_received as u64];
            comm.all_reduce_sum(&mut counts)?;
            assert_eq!(counts[0], counts[1]);
            if height > 1 && !codes.is_empty() {
                assert!(counts[0] > 0);
            }
            Ok(levels)
        })
    }

    /// Every level, concatenated over workers, equals the single-worker
    /// nodes of that level concatenated in node order.
    fn check_partition_invariant(codes: &[u64], height: usize, merged: &[LevelBits]) {
        let whole = build(codes, height).unwrap();
        for level in 0..height {
            let expected = concat(whole.level(level));
            let actual = concat(merged.iter().map(|w| w.level(level)));
            assert_eq!(actual, expected, "level {}", level);
        }
    }

    #[test]
    fn test_three_workers_twenty_symbols() -> TestResult {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let codes: Vec<u64> = (0..20).map(|_| rng.gen_range(0..8)).collect();
        let merged = run_merge(&codes, 3, 3, false)?;

        for (rank, w) in merged.iter().enumerate() {
            // level 0 is the worker's own shard
            let shard = &codes[w.partition().local_range()];
            assert_eq!(w.level(0), build(shard, 3)?.node(1));
            // B = 7
            let expected_len = if rank < 2 { 7 } else { 6 };
            for level in w.levels() {
                assert_eq!(level.len(), expected_len);
            }
        }
        check_partition_invariant(&codes, 3, &merged);
        Ok(())
    }

    #[test]
    fn test_empty_trailing_ranges() -> TestResult {
        // N = 5, W = 4: B = 2, the last worker owns nothing
        let codes = [3, 1, 0, 2, 3];
        let merged = run_merge(&codes, 2, 4, true)?;
        let lens: Vec<_> = merged.iter().map(|w| w.level(1).len()).collect();
        assert_eq!(lens, vec![2, 2, 1, 0]);
        check_partition_invariant(&codes, 2, &merged);
        Ok(())
    }

    #[test]
    fn test_partition_invariant_random() {
        arbtest::arbtest(|u| {
            let workers: usize = u.int_in_range(1..=6)?;
            let height: usize = u.int_in_range(1..=4)?;
            let n: usize = u.int_in_range(0..=200)?;
            let codes = (0..n)
                .map(|_| u.int_in_range(0..=(1u64 << height) - 1))
                .collect::<arbtest::arbitrary::Result<Vec<u64>>>()?;
            let discard: bool = u.arbitrary()?;
            let merged = run_merge(&codes, height, workers, discard).unwrap();
            check_partition_invariant(&codes, height, &merged);
            Ok(())
        });
    }

    #[test]
    fn test_wide_fragments_cross_chunks() -> TestResult {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let n = WRITE_CHUNK_WORDS * WORD_BITS * 2 + 77;
        let codes: Vec<u64> = (0..n).map(|_| rng.gen_range(0..6)).collect();
        let merged = run_merge(&codes, 3, 2, true)?;
        check_partition_invariant(&codes, 3, &merged);
        Ok(())
    }

    #[test]
    fn test_out_of_range_fragment_is_rejected() {
        let result = LocalCluster::new(2).run(|comm| {
            let partition = Partition::new(10, 2, comm.rank());
            if comm.rank() == 0 {
                // claims bits [2, 5) of a level, which worker 1 does not own
                comm.isend(1, Tag::level(1), vec![2, 3, 0])?;
                comm.barrier()?;
            } else {
                receive_level(comm, Tag::level(1), &partition)?;
            }
            Ok(())
        });
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        let range = 0..10;
        let short: Payload = vec![0].into();
        assert!(parse_fragment(short, &range).is_err());
        // 70 bits need two words after the header
        let truncated: Payload = vec![0, 70, 0].into();
        assert!(parse_fragment(truncated, &range).is_err());
        let ok: Payload = vec![4, 3, 0].into();
        let f = parse_fragment(ok, &range).unwrap();
        assert_eq!((f.offset, f.len), (4, 3));
    }
}
