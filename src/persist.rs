//! On-disk layout.
//!
//! Each worker writes one file per level, `<output>-<rank:04>.<level>`,
//! holding its range of the level as big-endian 64-bit words, MSB-first
//! within each word, with the final word zero-padded. The histogram goes to
//! `<output>.hist`: a big-endian entry count followed by big-endian
//! `(symbol, count)` pairs in effective-code order.

use crate::bits::{packed_len, Word};
use crate::bitvec::BitVector;
use crate::error::{Error, Result};
use crate::histogram::Histogram;
use crate::merge::LevelBits;
use crate::partition::Partition;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const HISTOGRAM_EXTENSION: &str = "hist";

fn with_suffix(output: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(output.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

pub fn level_path(output: &Path, rank: usize, level: usize) -> PathBuf {
    with_suffix(output, &format!("-{:04}.{}", rank, level))
}

pub fn histogram_path(output: &Path) -> PathBuf {
    with_suffix(output, &format!(".{}", HISTOGRAM_EXTENSION))
}

fn write_words(path: &Path, words: impl IntoIterator<Item = Word>) -> Result<usize> {
    let mut w = BufWriter::new(File::create(path)?);
    let mut bytes = 0;
    for word in words {
        w.write_all(&word.to_be_bytes())?;
        bytes += std::mem::size_of::<Word>();
    }
    w.flush()?;
    Ok(bytes)
}

fn read_words(path: &Path) -> Result<Vec<Word>> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    let size = std::mem::size_of::<Word>();
    if bytes.len() % size != 0 {
        return Err(Error::Format(format!(
            "{}: {} bytes is not a whole number of words",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(size)
        .map(|c| {
            let mut word = [0u8; 8];
            word.copy_from_slice(c);
            Word::from_be_bytes(word)
        })
        .collect())
}

/// Write one level range. Returns the number of bytes written.
pub fn save_level(path: &Path, bits: &BitVector) -> Result<usize> {
    write_words(path, bits.data().iter().copied())
}

/// Read one level range of `len` bits.
pub fn load_level(path: &Path, len: usize) -> Result<BitVector> {
    let words = read_words(path)?;
    if words.len() != packed_len(len) {
        return Err(Error::Format(format!(
            "{}: expected {} words for {} bits, found {}",
            path.display(),
            packed_len(len),
            len,
            words.len()
        )));
    }
    Ok(BitVector::from_words(words, len))
}

/// Write every level range held by this worker. Returns the number of
/// bytes written.
pub fn save_levels(output: &Path, levels: &LevelBits) -> Result<usize> {
    let rank = levels.partition().rank();
    let mut bytes = 0;
    for (level, bits) in levels.levels().iter().enumerate() {
        let path = level_path(output, rank, level);
        bytes += save_level(&path, bits)?;
        debug!(path = %path.display(), bits = bits.len(), "saved level");
    }
    Ok(bytes)
}

/// Read back the `height` level ranges written by the owner of `partition`.
pub fn load_levels(output: &Path, partition: Partition, height: usize) -> Result<LevelBits> {
    let len = partition.local_num();
    let levels = (0..height)
        .map(|level| load_level(&level_path(output, partition.rank(), level), len))
        .collect::<Result<Vec<_>>>()?;
    Ok(LevelBits::new(partition, levels))
}

pub fn save_histogram(path: &Path, histogram: &Histogram) -> Result<usize> {
    let entries = histogram.entries();
    let words = std::iter::once(entries.len() as u64).chain(entries.iter().flat_map(|&(s, c)| [s, c]));
    write_words(path, words)
}

pub fn load_histogram(path: &Path) -> Result<Histogram> {
    let words = read_words(path)?;
    let (&count, pairs) = words
        .split_first()
        .ok_or_else(|| Error::Format(format!("{}: empty histogram file", path.display())))?;
    if pairs.len() as u64 != 2 * count {
        return Err(Error::Format(format!(
            "{}: header announces {} entries, found {} words",
            path.display(),
            count,
            pairs.len()
        )));
    }
    Ok(Histogram::from_counts(pairs.chunks_exact(2).map(|p| (p[0], p[1]))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    #[test]
    fn test_file_names() {
        let out = Path::new("/tmp/run/wt");
        assert_eq!(level_path(out, 3, 2), PathBuf::from("/tmp/run/wt-0003.2"));
        assert_eq!(level_path(out, 12345, 10), PathBuf::from("/tmp/run/wt-12345.10"));
        assert_eq!(histogram_path(out), PathBuf::from("/tmp/run/wt.hist"));
    }

    #[test]
    fn test_level_bytes() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("level");
        // 65 bits: one full word and a single leading 1-bit in the second
        let mut bits = BitVector::zeros(65);
        bits.set(0, true);
        bits.set(63, true);
        bits.set(64, true);
        assert_eq!(save_level(&path, &bits)?, 16);

        let raw = std::fs::read(&path)?;
        assert_eq!(raw[0], 0x80);
        assert_eq!(raw[7], 0x01);
        assert_eq!(&raw[8..], &[0x80, 0, 0, 0, 0, 0, 0, 0]);

        assert_eq!(load_level(&path, 65)?, bits);
        assert!(matches!(load_level(&path, 200), Err(Error::Format(_))));
        Ok(())
    }

    #[test]
    fn test_levels_and_histogram() -> TestResult {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("wt");

        let partition = Partition::new(10, 2, 1);
        let levels: Vec<BitVector> = ["10110", "00001"]
            .iter()
            .map(|s| s.chars().map(|c| c == '1').collect())
            .collect();
        let levels = LevelBits::new(partition, levels);
        assert_eq!(save_levels(&out, &levels)?, 16);
        let back = load_levels(&out, partition, 2)?;
        assert_eq!(back.levels(), levels.levels());

        let histogram = Histogram::count_local(&[9, 1, 9, 1 << 39]);
        let path = histogram_path(&out);
        assert_eq!(save_histogram(&path, &histogram)?, 8 * 7);
        assert_eq!(load_histogram(&path)?, histogram);

        std::fs::write(&path, [0u8; 8 * 2])?;
        assert!(matches!(load_histogram(&path), Err(Error::Format(_))));
        Ok(())
    }
}
