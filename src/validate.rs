//! Round-trip check of a persisted tree against its input.
//!
//! Every position is decoded by descending the levels with rank queries:
//! within the current node range `[b, e)` a 0-bit moves to the left child,
//! which starts at `b` on the next level, and a 1-bit to the right child,
//! which starts after the node's zeros.

use crate::alphabet::EffectiveAlphabet;
use crate::bitvec::BitVector;
use crate::config::Config;
use crate::error::Result;
use crate::partition::{Partition, PartitionReader};
use crate::persist::{histogram_path, load_histogram, load_levels};
use crate::rank::RankIndex;
use rayon::prelude::*;
use std::path::Path;
use tracing::{error, info};

/// Decode the effective code at position `i` of a sequence of `n` symbols.
pub fn decode_at(levels: &[RankIndex], n: usize, i: usize) -> u64 {
    let (mut b, mut e, mut idx) = (0, n, i);
    let mut code = 0;
    for level in levels {
        let zeros = level.rank0(e) - level.rank0(b);
        let bit = level.get(idx);
        if bit {
            idx = b + zeros + level.rank1(idx) - level.rank1(b);
            b += zeros;
        } else {
            idx = b + level.rank0(idx) - level.rank0(b);
            e = b + zeros;
        }
        code = (code << 1) | bit as u64;
    }
    code
}

/// Decode all `n` codes.
pub fn decode(levels: &[RankIndex], n: usize) -> Vec<u64> {
    (0..n)
        .into_par_iter()
        .map(|i| decode_at(levels, n, i))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub position: usize,
    /// Raw input symbol.
    pub expected: u64,
    /// Raw symbol of the decoded code, or the code itself if it has none.
    pub decoded: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compare the full levels of a tree against the raw input it was built from.
pub fn check(
    levels: Vec<BitVector>,
    alphabet: &EffectiveAlphabet,
    raw: &[u64],
) -> Result<ValidationReport> {
    let levels: Vec<RankIndex> = levels.into_iter().map(RankIndex::new).collect();
    let n = raw.len();
    let decoded = decode(&levels, n);

    let mut mismatches = Vec::new();
    for (position, (&symbol, &code)) in raw.iter().zip(&decoded).enumerate() {
        if alphabet.map(symbol)? != code {
            let m = Mismatch {
                position,
                expected: symbol,
                decoded: alphabet.inverse(code).unwrap_or(code),
            };
            error!(
                position,
                expected = m.expected,
                decoded = m.decoded,
                "decoded symbol differs from input"
            );
            mismatches.push(m);
        }
    }
    Ok(ValidationReport {
        checked: n,
        mismatches,
    })
}

/// Stitch the per-worker files of every level back into full levels.
pub fn load_full_levels(
    output: &Path,
    total: usize,
    num_workers: usize,
    height: usize,
) -> Result<Vec<BitVector>> {
    let mut full = vec![BitVector::zeros(total); height];
    for rank in 0..num_workers {
        let partition = Partition::new(total, num_workers, rank);
        let range = partition.local_range();
        let parts = load_levels(output, partition, height)?;
        for (full, part) in full.iter_mut().zip(parts.levels()) {
            full.copy_from(range.start, part.data(), 0, range.len());
        }
    }
    Ok(full)
}

/// Validate the tree that a run with `config` wrote to its output path.
pub fn validate(config: &Config, output: &Path) -> Result<ValidationReport> {
    info!("Validating {} ...", output.display());
    let raw = PartitionReader::open(
        &config.input,
        config.width,
        config.prefix,
        1,
        0,
        config.read_buffer,
    )?
    .read_all()?;

    let histogram = load_histogram(&histogram_path(output))?;
    let alphabet = if config.effective {
        EffectiveAlphabet::identity_for(&histogram)?
    } else {
        EffectiveAlphabet::from_histogram(&histogram)
    };
    let levels = load_full_levels(output, raw.len(), config.workers, alphabet.height())?;
    let report = check(levels, &alphabet, &raw)?;
    if report.is_ok() {
        info!(checked = report.checked, "Validation passed");
    }
    Ok(report)
}
