//! Variable-width length codec.
//!
//! Key and value lengths are stored little-endian in the fewest bytes that
//! hold them. The width itself (0..=8) lives in a nibble of the record's
//! `size_info` byte, so the codec needs no continuation bits.

/// Widest encoding: a full u64.
pub const MAX_WIDTH: usize = 8;

/// Number of bytes needed to store `n`. Zero needs none.
pub fn size_width(n: u64) -> usize {
    MAX_WIDTH - (n.leading_zeros() as usize / 8)
}

/// Append `n` to `buf` in exactly `size_width(n)` bytes. Returns the width.
pub fn put_size(buf: &mut Vec<u8>, n: u64) -> usize {
    let width = size_width(n);
    buf.extend_from_slice(&n.to_le_bytes()[..width]);
    width
}

/// Decode a length written by [`put_size`]. `bytes.len()` is the width.
pub fn read_size(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; MAX_WIDTH];
    let width = bytes.len().min(MAX_WIDTH);
    raw[..width].copy_from_slice(&bytes[..width]);
    u64::from_le_bytes(raw)
}
