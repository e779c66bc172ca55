use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Width of one raw input symbol. Symbols are stored little-endian in the
/// input file and widened to `u64` once they are read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymbolWidth {
    U8,
    U16,
    U32,
    /// 5-byte symbols, for alphabets beyond 2^32.
    U40,
}

impl SymbolWidth {
    pub const ALL: [SymbolWidth; 4] = [Self::U8, Self::U16, Self::U32, Self::U40];

    pub const fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U40 => 5,
        }
    }

    /// Largest representable raw symbol.
    pub const fn max_symbol(self) -> u64 {
        (1 << (8 * self.bytes() as u32)) - 1
    }

    /// Decode one symbol from exactly `self.bytes()` little-endian bytes.
    #[inline]
    pub fn decode(self, bytes: &[u8]) -> u64 {
        debug_assert_eq!(bytes.len(), self.bytes());
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        u64::from_le_bytes(buf)
    }

    /// Encode `symbol` into `out`, which must be `self.bytes()` long.
    pub fn encode(self, symbol: u64, out: &mut [u8]) {
        debug_assert!(symbol <= self.max_symbol());
        out.copy_from_slice(&symbol.to_le_bytes()[..self.bytes()]);
    }

    /// Encode a whole sequence; mostly useful for writing test inputs.
    pub fn encode_all(self, symbols: &[u64]) -> Vec<u8> {
        let mut out = vec![0; symbols.len() * self.bytes()];
        for (chunk, &s) in out.chunks_exact_mut(self.bytes()).zip(symbols) {
            self.encode(s, chunk);
        }
        out
    }
}

impl TryFrom<usize> for SymbolWidth {
    type Error = Error;

    fn try_from(bytes: usize) -> Result<Self> {
        match bytes {
            1 => Ok(Self::U8),
            2 => Ok(Self::U16),
            4 => Ok(Self::U32),
            5 => Ok(Self::U40),
            _ => Err(Error::UnsupportedWidth(bytes)),
        }
    }
}

impl FromStr for SymbolWidth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s
            .trim()
            .parse::<usize>()
            .map_err(|_| Error::InvalidConfig(format!("symbol width {:?} is not a number", s)))?;
        Self::try_from(bytes)
    }
}

impl fmt::Display for SymbolWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes())
    }
}
