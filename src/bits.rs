//! Word-level bit helpers and the one canonical bit packer.
//!
//! Every bit sequence in this crate is stored MSB-first: bit `i` lives in word
//! `i / 64` at bit position `63 - (i % 64)`. Construction, message packing and
//! persistence all go through [`read_bits`], [`write_bits`] and [`copy_bits`],
//! so the layout is defined in exactly one place.

/// Storage word for all bit vectors and message payloads.
pub type Word = u64;

/// Number of bits in a [`Word`].
pub const WORD_BITS: usize = Word::BITS as usize;

/// Power of 2 of [`WORD_BITS`]
pub const WORD_BITS_LOG2: u32 = Word::BITS.ilog2();

/// Index of the word containing the `n`-th bit
#[inline]
pub const fn word_index(n: usize) -> usize {
    n >> WORD_BITS_LOG2
}

/// Offset of the `n`-th bit from the most significant end of its word
#[inline]
pub const fn word_offset(n: usize) -> usize {
    n & (WORD_BITS - 1)
}

/// Number of words needed to hold `num_bits` bits.
#[inline]
pub const fn packed_len(num_bits: usize) -> usize {
    num_bits.div_ceil(WORD_BITS)
}

/// Single-bit mask for the `n`-th bit of its word.
#[inline]
pub const fn bit_mask(n: usize) -> Word {
    1 << (WORD_BITS - 1 - word_offset(n))
}

/// A word with the highest `n` bits set. In MSB-first order these are
/// the first `n` bits of the word.
pub const fn high_mask(n: usize) -> Word {
    debug_assert!(n <= WORD_BITS);
    if n == 0 {
        0
    } else {
        Word::MAX << (WORD_BITS - n)
    }
}

/// Read `len <= 64` bits starting at bit `offs` of `src`.
/// The result is left-aligned: the first bit read ends up in the most
/// significant position and the unused low bits are zero.
#[inline]
pub fn read_bits(src: &[Word], offs: usize, len: usize) -> Word {
    debug_assert!(len <= WORD_BITS);
    if len == 0 {
        return 0;
    }
    let w = word_index(offs);
    let b = word_offset(offs);
    let mut value = src[w] << b;
    if b + len > WORD_BITS {
        value |= src[w + 1] >> (WORD_BITS - b);
    }
    value & high_mask(len)
}

/// Overwrite `len <= 64` bits of `dst` starting at bit `offs` with the
/// highest `len` bits of `value`. Bits outside the range are left as they are.
#[inline]
pub fn write_bits(dst: &mut [Word], offs: usize, len: usize, value: Word) {
    debug_assert!(len <= WORD_BITS);
    if len == 0 {
        return;
    }
    let value = value & high_mask(len);
    let w = word_index(offs);
    let b = word_offset(offs);

    // bits that land in the first word
    let m = high_mask(len) >> b;
    dst[w] = (dst[w] & !m) | (value >> b);

    // bits that spill over into the next word
    if b + len > WORD_BITS {
        let rem = b + len - WORD_BITS;
        let m = high_mask(rem);
        dst[w + 1] = (dst[w + 1] & !m) | ((value << (WORD_BITS - b)) & m);
    }
}

/// Copy `num` bits from `src` starting at bit `src_offs` into `dst` starting
/// at bit `dst_offs`, a word at a time.
///
/// This is the packer used for message payloads (`dst_offs == 0`), the
/// unpacker used when writing received fragments back (`src_offs == 0`), and
/// the general bulk copy between bit vectors.
pub fn copy_bits(src: &[Word], src_offs: usize, dst: &mut [Word], dst_offs: usize, num: usize) {
    let mut done = 0;

    // Align the destination first so that the main loop writes whole words.
    let head = (WORD_BITS - word_offset(dst_offs)) % WORD_BITS;
    if head > 0 {
        let len = head.min(num);
        write_bits(dst, dst_offs, len, read_bits(src, src_offs, len));
        done += len;
    }

    while num - done >= WORD_BITS {
        dst[word_index(dst_offs + done)] = read_bits(src, src_offs + done, WORD_BITS);
        done += WORD_BITS;
    }

    if done < num {
        let len = num - done;
        write_bits(dst, dst_offs + done, len, read_bits(src, src_offs + done, len));
    }
}

/// Smallest `h` such that `2^h >= n`. Returns 0 for `n <= 1`.
pub const fn ceil_log2(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}
