//! Global symbol frequencies.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use rayon::prelude::*;
use std::collections::HashMap;

/// Raw symbol counts over the whole distributed input.
///
/// Entries are ordered by descending count, ties broken by ascending symbol.
/// The position of an entry is the effective code of its symbol.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Histogram {
    entries: Vec<(u64, u64)>,
}

impl Histogram {
    /// Build from `(symbol, count)` pairs. Repeated symbols are summed and
    /// zero counts dropped.
    pub fn from_counts(counts: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let mut merged: HashMap<u64, u64> = HashMap::new();
        for (symbol, count) in counts {
            *merged.entry(symbol).or_default() += count;
        }
        let mut entries: Vec<_> = merged.into_iter().filter(|&(_, c)| c > 0).collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Self { entries }
    }

    /// Count the symbols of one shard.
    pub fn count_local(symbols: &[u64]) -> Self {
        let counts = symbols
            .par_chunks(1 << 16)
            .fold(HashMap::new, |mut m: HashMap<u64, u64>, chunk| {
                for &s in chunk {
                    *m.entry(s).or_default() += 1;
                }
                m
            })
            .reduce(HashMap::new, |mut a, b| {
                for (s, c) in b {
                    *a.entry(s).or_default() += c;
                }
                a
            });
        Self::from_counts(counts)
    }

    /// Combine every worker's local histogram into the global one, which all
    /// workers end up holding.
    pub fn compute<C: Communicator>(comm: &C, local_symbols: &[u64]) -> Result<Self> {
        let local = Self::count_local(local_symbols);
        let flat: Vec<u64> = local.entries.iter().flat_map(|&(s, c)| [s, c]).collect();
        let all = comm.all_gather(flat)?;
        let mut pairs = Vec::new();
        for (rank, flat) in all.iter().enumerate() {
            if flat.len() % 2 != 0 {
                return Err(Error::Protocol(format!(
                    "histogram from worker {} has odd length {}",
                    rank,
                    flat.len()
                )));
            }
            pairs.extend(flat.chunks_exact(2).map(|p| (p[0], p[1])));
        }
        Ok(Self::from_counts(pairs))
    }

    pub fn entries(&self) -> &[(u64, u64)] {
        &self.entries
    }

    /// Number of distinct symbols.
    pub fn sigma(&self) -> usize {
        self.entries.len()
    }

    /// Total number of symbols counted.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|&(_, c)| c).sum()
    }

    pub fn max_symbol(&self) -> Option<u64> {
        self.entries.iter().map(|&(s, _)| s).max()
    }
}
