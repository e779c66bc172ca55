//! Even distribution of the input across workers and the reader for one
//! worker's shard of an input file.

use crate::error::{Error, Result};
use crate::symbol::SymbolWidth;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

/// Worker `r` owns global positions `[r*B, min((r+1)*B, N))` with
/// `B = ceil(N/W)`. The same ranges are used for the input shards and for
/// every merged tree level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    total: usize,
    num_workers: usize,
    rank: usize,
}

impl Partition {
    pub fn new(total: usize, num_workers: usize, rank: usize) -> Self {
        assert!(num_workers > 0, "need at least one worker");
        assert!(rank < num_workers, "rank {} out of {}", rank, num_workers);
        Self {
            total,
            num_workers,
            rank,
        }
    }

    /// Total number of symbols across all workers (`N`).
    pub fn total_size(&self) -> usize {
        self.total
    }

    /// `B = ceil(N/W)`
    pub fn size_per_worker(&self) -> usize {
        self.total.div_ceil(self.num_workers)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Global range owned by worker `rank`. Trailing workers may own an empty range.
    pub fn range_of(&self, rank: usize) -> Range<usize> {
        let b = self.size_per_worker();
        let start = (rank * b).min(self.total);
        let end = (start + b).min(self.total);
        start..end
    }

    pub fn local_range(&self) -> Range<usize> {
        self.range_of(self.rank)
    }

    /// Number of symbols (and, after merge, bits per level) owned by this worker.
    pub fn local_num(&self) -> usize {
        self.local_range().len()
    }

    /// The worker owning global position `pos`.
    pub fn owner_of(&self, pos: usize) -> usize {
        debug_assert!(pos < self.total);
        pos / self.size_per_worker()
    }
}

/// Reads this worker's shard of raw symbols from an input file.
///
/// Only the first `prefix` bytes of the file are considered; a trailing
/// partial symbol is ignored.
pub struct PartitionReader {
    partition: Partition,
    width: SymbolWidth,
    reader: BufReader<File>,
    remaining: usize,
}

impl PartitionReader {
    pub fn open(
        path: &Path,
        width: SymbolWidth,
        prefix: Option<u64>,
        num_workers: usize,
        rank: usize,
        buffer_symbols: Option<usize>,
    ) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let bytes = prefix.map_or(file_len, |p| p.min(file_len));
        let total = usize::try_from(bytes / width.bytes() as u64)
            .map_err(|_| Error::InvalidConfig(format!("input of {} bytes is too large", bytes)))?;

        let partition = Partition::new(total, num_workers, rank);
        let local = partition.local_range();

        // default to buffering the whole shard, capped to keep the buffer sane
        let buffer_symbols = buffer_symbols
            .unwrap_or(local.len())
            .clamp(1, 1 << 24);
        let mut reader = BufReader::with_capacity(buffer_symbols * width.bytes(), file);
        reader.seek(SeekFrom::Start((local.start * width.bytes()) as u64))?;

        Ok(Self {
            partition,
            width,
            reader,
            remaining: local.len(),
        })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn local_num(&self) -> usize {
        self.partition.local_num()
    }

    pub fn total_size(&self) -> usize {
        self.partition.total_size()
    }

    pub fn size_per_worker(&self) -> usize {
        self.partition.size_per_worker()
    }

    /// Read the rest of the shard, calling `f` for each raw symbol in order.
    pub fn for_each(&mut self, mut f: impl FnMut(u64) -> Result<()>) -> Result<()> {
        let mut buf = [0u8; 8];
        let w = self.width.bytes();
        while self.remaining > 0 {
            self.reader.read_exact(&mut buf[..w])?;
            self.remaining -= 1;
            f(self.width.decode(&buf[..w]))?;
        }
        Ok(())
    }

    /// Read the rest of the shard into memory.
    pub fn read_all(&mut self) -> Result<Vec<u64>> {
        let mut out = Vec::with_capacity(self.remaining);
        self.for_each(|s| {
            out.push(s);
            Ok(())
        })?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use testresult::TestResult;

    #[test]
    fn test_uneven_ranges() {
        // N = 20, W = 3 → B = 7
        let ranges: Vec<_> = (0..3).map(|r| Partition::new(20, 3, r).local_range()).collect();
        assert_eq!(ranges, vec![0..7, 7..14, 14..20]);
        assert_eq!(Partition::new(20, 3, 0).size_per_worker(), 7);
        assert_eq!(Partition::new(20, 3, 0).owner_of(13), 1);
        assert_eq!(Partition::new(20, 3, 0).owner_of(14), 2);
    }

    #[test]
    fn test_more_workers_than_symbols() {
        // N = 2, W = 4 → B = 1; the last two workers own nothing
        let sizes: Vec<_> = (0..4).map(|r| Partition::new(2, 4, r).local_num()).collect();
        assert_eq!(sizes, vec![1, 1, 0, 0]);
        assert_eq!(Partition::new(2, 4, 3).local_range(), 2..2);

        // an empty input gives every worker an empty range
        assert_eq!(Partition::new(0, 3, 1).local_range(), 0..0);
    }

    #[test]
    fn test_reader_shards_and_prefix() -> TestResult {
        let width = SymbolWidth::U16;
        let symbols: Vec<u64> = (0..11).map(|i| 1000 + i).collect();
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&width.encode_all(&symbols))?;
        // an odd trailing byte is not a whole symbol
        file.write_all(&[0xFF])?;
        file.flush()?;

        let mut all = vec![];
        for rank in 0..3 {
            let mut reader = PartitionReader::open(file.path(), width, None, 3, rank, Some(2))?;
            assert_eq!(reader.total_size(), 11);
            all.extend(reader.read_all()?);
        }
        assert_eq!(all, symbols);

        // prefix is given in bytes
        let mut reader = PartitionReader::open(file.path(), width, Some(9), 1, 0, None)?;
        assert_eq!(reader.local_num(), 4);
        assert_eq!(reader.read_all()?, symbols[..4]);
        Ok(())
    }
}
