//! Fixed-width big-endian integer codecs and MSB0 bit helpers.
//!
//! Every integer the engine persists is big-endian with an explicit byte
//! width between 1 and 8. Bitmaps are MSB0: bit `b` lives in byte `b / 8`
//! under the mask `1 << (7 - b % 8)`, so set bits enumerate in ascending
//! bit-index order when bytes are scanned left to right.

/// Reads a `width`-byte big-endian unsigned integer from `buf` at `offset`.
///
/// `width` must be in `1..=8` and the span must lie inside `buf`.
#[inline]
pub fn read_uint_be(buf: &[u8], offset: usize, width: usize) -> u64 {
    debug_assert!((1..=8).contains(&width));
    let mut value = 0u64;
    for &byte in &buf[offset..offset + width] {
        value = (value << 8) | u64::from(byte);
    }
    value
}

/// Writes `value` as a `width`-byte big-endian unsigned integer into `buf`
/// at `offset`.
///
/// `width` must be in `1..=8`; `value` must fit in `width` bytes.
#[inline]
pub fn write_uint_be(buf: &mut [u8], offset: usize, width: usize, value: u64) {
    debug_assert!((1..=8).contains(&width));
    debug_assert!(width == 8 || value < 1u64 << (8 * width), "value does not fit width");
    for i in 0..width {
        buf[offset + width - 1 - i] = (value >> (8 * i)) as u8;
    }
}

/// Minimal number of bits needed to represent `n` (0 for 0).
#[inline]
pub fn bit_width(n: u64) -> u32 {
    64 - n.leading_zeros()
}

/// Minimal number of bytes (at least 1) needed to hold `value`.
#[inline]
pub fn byte_width(value: u64) -> usize {
    (bit_width(value).max(1) as usize + 7) / 8
}

/// Returns the MSB0 bit at index `bit`.
#[inline]
pub fn get_bit(buf: &[u8], bit: usize) -> bool {
    buf[bit / 8] & (1 << (7 - bit % 8)) != 0
}

/// Sets the MSB0 bit at index `bit`.
#[inline]
pub fn set_bit(buf: &mut [u8], bit: usize) {
    buf[bit / 8] |= 1 << (7 - bit % 8);
}

/// Counts set bits strictly before MSB0 index `bit` (rank).
pub fn count_ones_before(buf: &[u8], bit: usize) -> usize {
    let full_bytes = bit / 8;
    let mut ones = 0usize;
    for &byte in &buf[..full_bytes] {
        ones += byte.count_ones() as usize;
    }
    let partial_bits = bit % 8;
    if partial_bits > 0 {
        let mask = !(0xFFu8 >> partial_bits);
        ones += (buf[full_bytes] & mask).count_ones() as usize;
    }
    ones
}

/// Returns the ascending MSB0 indices of all set bits among the first
/// `nbits` bits of `buf` (select helper).
pub fn set_bit_positions(buf: &[u8], nbits: usize) -> Vec<usize> {
    let mut positions = Vec::new();
    for bit in 0..nbits {
        if get_bit(buf, bit) {
            positions.push(bit);
        }
    }
    positions
}
