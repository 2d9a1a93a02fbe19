//! Bit search over 32-bit words.
//!
//! Free bitmaps in the buddy allocator look for set bits while the pool
//! occupancy table looks for clear ones, so every search takes the polarity
//! it wants.

use alloc::vec;
use alloc::vec::Vec;

/// Bits per bitmap word
pub const WORD_BITS: usize = 32;

/// Number of words needed to hold `bits` bits.
pub const fn words_for(bits: usize) -> usize {
    (bits + WORD_BITS - 1) / WORD_BITS
}

/// Finds the lowest bit equal to `want_one` in a single word.
///
/// Returns `None` when the word is all zeros (searching for a one) or all
/// ones (searching for a zero).
pub fn find_first_bit_in_word(word: u32, want_one: bool) -> Option<u32> {
    let mut word = if want_one { word } else { !word };
    if word == 0 {
        return None;
    }

    let mut bit = 0;
    if word & 0xffff == 0 {
        word >>= 16;
        bit += 16;
    }
    if word & 0xff == 0 {
        word >>= 8;
        bit += 8;
    }
    if word & 0xf == 0 {
        word >>= 4;
        bit += 4;
    }
    if word & 0x3 == 0 {
        word >>= 2;
        bit += 2;
    }
    if word & 0x1 == 0 {
        bit += 1;
    }
    Some(bit)
}

/// Finds the lowest bit equal to `want_one` across a word array.
///
/// The returned index is global: `word * 32 + bit`.
pub fn find_first_bit_in_array(words: &[u32], want_one: bool) -> Option<usize> {
    let skip = if want_one { 0 } else { u32::MAX };
    words
        .iter()
        .position(|&word| word != skip)
        .and_then(|index| {
            find_first_bit_in_word(words[index], want_one)
                .map(|bit| index * WORD_BITS + bit as usize)
        })
}

#[inline]
fn split(bit: usize) -> (usize, u32) {
    (bit >> 5, 1 << (bit & 31))
}

/// Sets `bit` in a flat word array.
#[inline]
pub fn set_bit(bit: usize, words: &mut [u32]) {
    let (word, mask) = split(bit);
    words[word] |= mask;
}

/// Clears `bit` in a flat word array.
#[inline]
pub fn clear_bit(bit: usize, words: &mut [u32]) {
    let (word, mask) = split(bit);
    words[word] &= !mask;
}

/// Reads `bit` from a flat word array.
#[inline]
pub fn get_bit(bit: usize, words: &[u32]) -> bool {
    let (word, mask) = split(bit);
    words[word] & mask != 0
}

/// Owned bitmap with a fixed number of meaningful bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u32>,
    bits: usize,
}

impl Bitmap {
    /// Creates a bitmap with `bits` cleared bits.
    pub fn new(bits: usize) -> Self {
        Self {
            words: vec![0; words_for(bits)],
            bits,
        }
    }

    /// Number of meaningful bits.
    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Backing words.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn set(&mut self, bit: usize) {
        debug_assert!(bit < self.bits);
        set_bit(bit, &mut self.words);
    }

    pub fn clear(&mut self, bit: usize) {
        debug_assert!(bit < self.bits);
        clear_bit(bit, &mut self.words);
    }

    pub fn get(&self, bit: usize) -> bool {
        bit < self.bits && get_bit(bit, &self.words)
    }

    /// Lowest set bit.
    pub fn first_set(&self) -> Option<usize> {
        find_first_bit_in_array(&self.words, true).filter(|&bit| bit < self.bits)
    }

    /// Lowest clear bit inside the meaningful range.
    pub fn first_clear(&self) -> Option<usize> {
        find_first_bit_in_array(&self.words, false).filter(|&bit| bit < self.bits)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Clears every bit.
    pub fn reset(&mut self) {
        self.words.iter_mut().for_each(|word| *word = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_search_finds_lowest_one() {
        assert_eq!(find_first_bit_in_word(0, true), None);
        assert_eq!(find_first_bit_in_word(1, true), Some(0));
        assert_eq!(find_first_bit_in_word(0x8000_0000, true), Some(31));
        assert_eq!(find_first_bit_in_word(0b1011_0000, true), Some(4));
    }

    #[test]
    fn word_search_finds_lowest_zero() {
        assert_eq!(find_first_bit_in_word(u32::MAX, false), None);
        assert_eq!(find_first_bit_in_word(0, false), Some(0));
        assert_eq!(find_first_bit_in_word(0x7fff_ffff, false), Some(31));
        assert_eq!(find_first_bit_in_word(0b0111, false), Some(3));
    }

    #[test]
    fn word_search_matches_trailing_zeros() {
        for shift in 0..32 {
            let word = 0xdead_0000u32.rotate_left(shift) | (1 << shift);
            assert_eq!(
                find_first_bit_in_word(word, true),
                Some(word.trailing_zeros())
            );
        }
    }

    #[test]
    fn array_search_skips_saturated_words() {
        let words = [0, 0, 0x10];
        assert_eq!(find_first_bit_in_array(&words, true), Some(68));

        let words = [u32::MAX, 0xffff_fffe];
        assert_eq!(find_first_bit_in_array(&words, false), Some(32));
        assert_eq!(find_first_bit_in_array(&[u32::MAX; 2], false), None);
        assert_eq!(find_first_bit_in_array(&[0; 4], true), None);
    }

    #[test]
    fn set_clear_get() {
        let mut words = [0u32; 2];
        set_bit(33, &mut words);
        assert!(get_bit(33, &words));
        assert_eq!(words[1], 0b10);
        clear_bit(33, &mut words);
        assert!(!get_bit(33, &words));
    }

    #[test]
    fn owned_bitmap_ignores_padding_bits() {
        let mut map = Bitmap::new(3);
        map.set(0);
        map.set(1);
        map.set(2);
        assert_eq!(map.first_clear(), None);
        map.clear(1);
        assert_eq!(map.first_clear(), Some(1));
        assert_eq!(map.first_set(), Some(0));
        assert_eq!(map.count_ones(), 2);
    }
}
