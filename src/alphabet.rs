//! Dense re-coding of raw symbols.

use crate::bits::ceil_log2;
use crate::error::{Error, Result};
use crate::histogram::Histogram;
use rayon::prelude::*;
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Mapping {
    /// Raw symbol to rank, with the inverse indexed by rank.
    Table {
        ranks: HashMap<u64, u64>,
        symbols: Vec<u64>,
    },
    /// The input already holds codes in `[0, sigma)`.
    Identity,
}

/// Injective map from observed raw symbols onto `[0, sigma)`.
///
/// Rank 0 is the most frequent symbol. Symbols that were never observed have
/// no code; mapping one is an error.
#[derive(Clone, Debug)]
pub struct EffectiveAlphabet {
    mapping: Mapping,
    sigma: usize,
}

impl EffectiveAlphabet {
    pub fn from_histogram(histogram: &Histogram) -> Self {
        let symbols: Vec<u64> = histogram.entries().iter().map(|&(s, _)| s).collect();
        let ranks = symbols
            .iter()
            .enumerate()
            .map(|(rank, &s)| (s, rank as u64))
            .collect();
        Self {
            sigma: symbols.len(),
            mapping: Mapping::Table { ranks, symbols },
        }
    }

    /// Alphabet for input that is already effective: every code below
    /// `sigma` maps to itself.
    pub fn identity(sigma: usize) -> Self {
        Self {
            mapping: Mapping::Identity,
            sigma,
        }
    }

    /// Identity alphabet covering `[0, max + 1)` of the observed symbols.
    ///
    /// Effective input must use every code up to its largest one, otherwise
    /// the tree would be sized for codes that never occur.
    pub fn identity_for(histogram: &Histogram) -> Result<Self> {
        let sigma = match histogram.max_symbol() {
            None => 0,
            Some(max) => usize::try_from(max)
                .ok()
                .and_then(|m| m.checked_add(1))
                .ok_or(Error::UnmappedSymbol(max))?,
        };
        if sigma != histogram.sigma() {
            return Err(Error::InvalidConfig(format!(
                "effective input has {} distinct codes but its largest code is {}",
                histogram.sigma(),
                sigma - 1
            )));
        }
        Ok(Self::identity(sigma))
    }

    #[inline]
    pub fn map(&self, symbol: u64) -> Result<u64> {
        match &self.mapping {
            Mapping::Table { ranks, .. } => {
                ranks.get(&symbol).copied().ok_or(Error::UnmappedSymbol(symbol))
            }
            Mapping::Identity if symbol < self.sigma as u64 => Ok(symbol),
            Mapping::Identity => Err(Error::UnmappedSymbol(symbol)),
        }
    }

    /// The raw symbol with effective code `code`.
    pub fn inverse(&self, code: u64) -> Option<u64> {
        match &self.mapping {
            Mapping::Table { symbols, .. } => symbols.get(code as usize).copied(),
            Mapping::Identity => (code < self.sigma as u64).then_some(code),
        }
    }

    /// Replace every raw symbol by its code, in parallel.
    pub fn transform(&self, symbols: &mut [u64]) -> Result<()> {
        if let Mapping::Identity = self.mapping {
            // still has to reject out-of-range input
            if let Some(&bad) = symbols.par_iter().find_any(|&&s| s >= self.sigma as u64) {
                return Err(Error::UnmappedSymbol(bad));
            }
            return Ok(());
        }
        symbols.par_iter_mut().try_for_each(|s| {
            *s = self.map(*s)?;
            Ok(())
        })
    }

    /// Global count of every code in `[0, sigma)`, from the histogram the
    /// alphabet was derived from.
    pub fn code_counts(&self, histogram: &Histogram) -> Result<Vec<u64>> {
        let mut counts = vec![0; self.sigma];
        for &(symbol, count) in histogram.entries() {
            counts[self.map(symbol)? as usize] += count;
        }
        Ok(counts)
    }

    pub fn sigma(&self) -> usize {
        self.sigma
    }

    /// Height of the tree over this alphabet, `ceil(log2(sigma))`.
    pub fn height(&self) -> usize {
        ceil_log2(self.sigma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abracadabra_ranks() {
        let text: Vec<u64> = b"abracadabra".iter().map(|&b| b as u64).collect();
        let alphabet = EffectiveAlphabet::from_histogram(&Histogram::count_local(&text));
        assert_eq!(alphabet.sigma(), 5);
        assert_eq!(alphabet.height(), 3);

        let mut codes = text.clone();
        alphabet.transform(&mut codes).unwrap();
        assert_eq!(codes, vec![0, 1, 2, 0, 3, 0, 4, 0, 1, 2, 0]);

        let back: Vec<u64> = codes.iter().map(|&c| alphabet.inverse(c).unwrap()).collect();
        assert_eq!(back, text);
        assert_eq!(alphabet.inverse(5), None);
    }

    #[test]
    fn test_unmapped_symbol_is_fatal() {
        let alphabet = EffectiveAlphabet::from_histogram(&Histogram::count_local(&[1, 2]));
        let mut codes = vec![1, 2, 3];
        assert!(matches!(
            alphabet.transform(&mut codes),
            Err(Error::UnmappedSymbol(3))
        ));

        let histogram = Histogram::count_local(&[0, 4, 4]);
        let identity = EffectiveAlphabet::identity(5);
        assert_eq!(identity.code_counts(&histogram).unwrap(), vec![1, 0, 0, 0, 2]);
        // codes that never occur are still in range
        assert_eq!(identity.map(2).unwrap(), 2);
        assert!(matches!(identity.map(5), Err(Error::UnmappedSymbol(5))));
        let mut codes = vec![0, 9];
        assert!(identity.transform(&mut codes).is_err());
    }

    #[test]
    fn test_effective_codes_must_be_dense() {
        let dense = Histogram::count_local(&[2, 0, 1, 1]);
        let identity = EffectiveAlphabet::identity_for(&dense).unwrap();
        assert_eq!(identity.sigma(), 3);
        assert_eq!(identity.code_counts(&dense).unwrap(), vec![1, 2, 1]);

        let empty = EffectiveAlphabet::identity_for(&Histogram::count_local(&[])).unwrap();
        assert_eq!(empty.sigma(), 0);

        // one large code would otherwise size the tree for 2^30 codes
        let sparse = Histogram::count_local(&[0, 1 << 30, 0, 0]);
        assert!(matches!(
            EffectiveAlphabet::identity_for(&sparse),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            EffectiveAlphabet::identity_for(&Histogram::count_local(&[u64::MAX])),
            Err(_)
        ));
    }

    #[test]
    fn test_heights() {
        assert_eq!(EffectiveAlphabet::identity(0).height(), 0);
        assert_eq!(EffectiveAlphabet::identity(1).height(), 0);
        assert_eq!(EffectiveAlphabet::identity(2).height(), 1);
        assert_eq!(EffectiveAlphabet::identity(4).height(), 2);
        assert_eq!(EffectiveAlphabet::identity(5).height(), 3);
    }
}
