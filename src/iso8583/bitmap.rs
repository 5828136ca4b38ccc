//! Primary 8-byte bitmap build and parse.

use crate::error::{PosError, Result};

/// Build the primary bitmap from 1-based bit positions.
///
/// Bit `n` sits in byte `(n-1)/8` under mask `0x80 >> ((n-1) % 8)`.
/// Bit 1 (secondary bitmap) is never set in this dialect.
pub fn build(bits: &[u8]) -> Result<[u8; 8]> {
    let mut out = [0u8; 8];
    for &bit in bits {
        if !(2..=64).contains(&bit) {
            return Err(PosError::Encoding(format!("bitmap bit {bit} out of range")));
        }
        let idx = (bit - 1) as usize;
        out[idx / 8] |= 0x80 >> (idx % 8);
    }
    Ok(out)
}

/// Ordered list of 1-based active bit positions.
pub fn parse(bitmap: &[u8; 8]) -> Vec<u8> {
    let mut bits = Vec::new();
    for (i, byte) in bitmap.iter().enumerate() {
        for j in 0..8 {
            if byte & (0x80 >> j) != 0 {
                bits.push((i * 8 + j + 1) as u8);
            }
        }
    }
    bits
}
