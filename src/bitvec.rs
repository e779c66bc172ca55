use crate::bits::{bit_mask, copy_bits, high_mask, packed_len, word_index, word_offset, Word};
use std::fmt;

/// Packed, word-aligned boolean array.
///
/// Bits are stored MSB-first (see [`crate::bits`]). Bits beyond `len` in the
/// final word are always zero, which lets the raw words be written to disk or
/// popcounted without masking.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BitVector {
    words: Vec<Word>,
    len: usize,
}

impl BitVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a new `BitVector` of `len` 0-bits.
    pub fn zeros(len: usize) -> Self {
        Self {
            words: vec![0; packed_len(len)],
            len,
        }
    }

    /// Wrap raw MSB-first words. Any bits past `len` are cleared.
    pub fn from_words(mut words: Vec<Word>, len: usize) -> Self {
        assert!(
            packed_len(len) <= words.len(),
            "{} words cannot hold {} bits",
            words.len(),
            len
        );
        words.truncate(packed_len(len));
        let mut bv = Self { words, len };
        bv.clear_tail();
        bv
    }

    /// Resize to `len` bits. New bits are 0-bits.
    pub fn resize(&mut self, len: usize) {
        self.words.resize(packed_len(len), 0);
        self.len = len;
        self.clear_tail();
    }

    #[inline]
    pub fn get(&self, i: usize) -> bool {
        debug_assert!(i < self.len, "bit index {} out of bounds {}", i, self.len);
        self.words[word_index(i)] & bit_mask(i) != 0
    }

    #[inline]
    pub fn set(&mut self, i: usize, value: bool) {
        debug_assert!(i < self.len, "bit index {} out of bounds {}", i, self.len);
        let w = &mut self.words[word_index(i)];
        if value {
            *w |= bit_mask(i);
        } else {
            *w &= !bit_mask(i);
        }
    }

    /// Append a bit, growing by one.
    pub fn push(&mut self, value: bool) {
        if word_offset(self.len) == 0 {
            self.words.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, value);
    }

    /// Overwrite bits `[offs, offs + num)` from `src` starting at bit `src_offs`.
    pub fn copy_from(&mut self, offs: usize, src: &[Word], src_offs: usize, num: usize) {
        assert!(offs + num <= self.len);
        copy_bits(src, src_offs, &mut self.words, offs, num);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The underlying words. The final word is zero-padded past `len`.
    pub fn data(&self) -> &[Word] {
        &self.words
    }

    /// Mutable access to the underlying words for bulk writers.
    /// Callers must not set bits past `len`.
    pub fn data_mut(&mut self) -> &mut [Word] {
        &mut self.words
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Approximate heap footprint in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<Word>()
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|i| self.get(i))
    }

    fn clear_tail(&mut self) {
        let used = word_offset(self.len);
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= high_mask(used);
            }
        }
    }
}

impl FromIterator<bool> for BitVector {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut bv = BitVector::new();
        for b in iter {
            bv.push(b);
        }
        bv
    }
}

// Render as a string of 0s and 1s, which keeps test failures readable.
impl fmt::Debug for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitVector({}: ", self.len)?;
        fmt::Display::fmt(self, f)?;
        write!(f, ")")
    }
}

impl fmt::Display for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.iter() {
            f.write_str(if b { "1" } else { "0" })?;
        }
        Ok(())
    }
}
