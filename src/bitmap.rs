//! Occupancy bitmaps of pool frames. Bit `i` set means slot `i` is taken.
//!
//! The first free slot is found one 64-bit word at a time. Inside a word
//! the lowest clear bit is isolated and turned into its index with a de
//! Bruijn multiply-shift-lookup instead of a bit-by-bit scan:
//!
//! ```text
//! word      = ...1011 0111
//! isolated  = !word & (word + 1)          = ...0000 1000
//! index     = TABLE[(isolated * DEBRUIJN) >> 58] = 3
//! ```

/// Bits per bitmap word.
pub(crate) const WORD_BITS: usize = u64::BITS as usize;

/// 64-bit de Bruijn sequence: every 6-bit window of it is distinct.
const DEBRUIJN: u64 = 0x03f7_9d71_b4cb_0a89;

/// `WORD_BITS - log2(WORD_BITS)`.
const DEBRUIJN_SHIFT: u32 = 58;

const DEBRUIJN_TABLE: [u8; WORD_BITS] = {
    let mut table = [0u8; WORD_BITS];
    let mut bit = 0;
    while bit < WORD_BITS {
        table[((1u64 << bit).wrapping_mul(DEBRUIJN) >> DEBRUIJN_SHIFT) as usize] = bit as u8;
        bit += 1;
    }
    table
};

/// Number of words needed for `bits` bits.
#[inline]
pub(crate) const fn words_for(bits: usize) -> usize {
    bits.div_ceil(WORD_BITS)
}

/// Position of the single set bit of `isolated`.
#[inline]
fn bit_index(isolated: u64) -> usize {
    debug_assert_eq!(isolated.count_ones(), 1);
    DEBRUIJN_TABLE[(isolated.wrapping_mul(DEBRUIJN) >> DEBRUIJN_SHIFT) as usize] as usize
}

/// Index of the lowest clear bit across `words`, if any.
#[inline]
pub(crate) fn first_free(words: &[u64]) -> Option<usize> {
    words.iter().enumerate().find_map(|(i, &word)| {
        let isolated = !word & word.wrapping_add(1);
        (isolated != 0).then(|| i * WORD_BITS + bit_index(isolated))
    })
}

#[inline]
pub(crate) fn is_set(words: &[u64], index: usize) -> bool {
    words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
}

#[inline]
pub(crate) fn set(words: &mut [u64], index: usize) {
    words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
}

#[inline]
pub(crate) fn clear(words: &mut [u64], index: usize) {
    words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
}

/// Clears the first `bits` bits and sets every bit past them, so a search
/// never lands outside the tracked range.
pub(crate) fn reset(words: &mut [u64], bits: usize) {
    for (i, word) in words.iter_mut().enumerate() {
        let start = i * WORD_BITS;
        *word = if bits >= start + WORD_BITS {
            0
        } else if bits <= start {
            u64::MAX
        } else {
            u64::MAX << (bits - start)
        };
    }
}
