/*!
 * Occupancy Bitmap
 *
 * One bit per slot: set while the slot is rented. The bitmap never drives
 * slot selection in the single-slab pools; it only catches duplicate and
 * mismatched returns. `FixedSlot64Pool` also uses it to pick the first free
 * slot of a slab.
 */

/// Bits per bitmap word
pub(crate) const WORD_BITS: usize = u64::BITS as usize;

/// Words needed to hold `bits` bits
#[inline]
pub(crate) const fn words_for(bits: usize) -> usize {
    (bits + WORD_BITS - 1) / WORD_BITS
}

/// Mark `index` rented; false if it already was
#[inline]
pub(crate) fn set(words: &mut [u64], index: usize) -> bool {
    let (word, mask) = locate(index);
    let was_clear = words[word] & mask == 0;
    words[word] |= mask;
    was_clear
}

/// Mark `index` free; false if it already was
#[inline]
pub(crate) fn clear(words: &mut [u64], index: usize) -> bool {
    let (word, mask) = locate(index);
    let was_set = words[word] & mask != 0;
    words[word] &= !mask;
    was_set
}

#[inline]
pub(crate) fn test(words: &[u64], index: usize) -> bool {
    let (word, mask) = locate(index);
    words[word] & mask != 0
}

/// First clear bit of a 64-slot word
#[inline]
pub(crate) fn first_free(word: u64) -> Option<u32> {
    let free = !word;
    if free == 0 {
        None
    } else {
        Some(free.trailing_zeros())
    }
}

#[inline]
fn locate(index: usize) -> (usize, u64) {
    (index / WORD_BITS, 1u64 << (index % WORD_BITS))
}
