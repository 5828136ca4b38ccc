//! Hex / BCD string utilities shared by the codec and the builders.
//!
//! The UnionPay dialect expresses field lengths in hex nibbles, so most
//! values travel through here as ASCII-hex strings and are packed into
//! bytes right before hitting the wire.

use crate::error::{PosError, Result};

/// Padding side for [`str_to_hex_padded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    /// Zero-pad on the left (numeric fields).
    Left,
    /// Zero-pad on the right (track data, free-form fields).
    Right,
}

/// Decimal integer to left-zero-padded ASCII of exact width.
pub fn num_to_ascii(n: u64, width: usize) -> String {
    format!("{n:0width$}")
}

fn check_hex(s: &str) -> Result<()> {
    if let Some(c) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(PosError::Encoding(format!("invalid hex char {c:?} in {s:?}")));
    }
    Ok(())
}

/// Hex string to raw bytes; an odd nibble count is right-padded with '0'.
pub fn str_to_hex(s: &str) -> Result<Vec<u8>> {
    check_hex(s)?;
    let mut owned;
    let even = if s.len() % 2 == 1 {
        owned = String::with_capacity(s.len() + 1);
        owned.push_str(s);
        owned.push('0');
        owned.as_str()
    } else {
        s
    };
    hex::decode(even).map_err(|e| PosError::Encoding(format!("hex decode failed: {e}")))
}

/// Hex string to raw bytes zero-padded to `width` bytes.
///
/// An odd nibble count gains its '0' on the padding side before the
/// string is split into bytes, so `"1"` left-aligned to 6 bytes becomes
/// `00 00 00 00 00 01`.
pub fn str_to_hex_padded(s: &str, width: usize, align: Align) -> Result<Vec<u8>> {
    check_hex(s)?;
    let mut nibbles = String::with_capacity(width * 2);
    match align {
        Align::Left => {
            let odd = s.len() % 2;
            if s.len() + odd > width * 2 {
                return Err(PosError::Encoding(format!(
                    "{s:?} does not fit in {width} bytes"
                )));
            }
            for _ in 0..(width * 2 - s.len() - odd) {
                nibbles.push('0');
            }
            if odd == 1 {
                nibbles.push('0');
            }
            nibbles.push_str(s);
        }
        Align::Right => {
            if s.len() > width * 2 {
                return Err(PosError::Encoding(format!(
                    "{s:?} does not fit in {width} bytes"
                )));
            }
            nibbles.push_str(s);
            while nibbles.len() < width * 2 {
                nibbles.push('0');
            }
        }
    }
    hex::decode(&nibbles).map_err(|e| PosError::Encoding(format!("hex decode failed: {e}")))
}

/// Raw bytes to uppercase ASCII-hex.
pub fn bytes_to_hex_upper(b: &[u8]) -> String {
    hex::encode_upper(b)
}

/// ASCII bytes of `s`, zero-byte padded (or truncated) to `width`.
///
/// `width == 0` keeps the natural length.
pub fn ascii_bytes(s: &str, width: usize) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    if width > 0 {
        out.resize(width, 0);
    }
    out
}

/// 2-digit decimal length prefix for LLVAR fields.
pub fn llvar(len: usize) -> String {
    format!("{len:02}")
}

/// 4-digit decimal length prefix for LLLVAR fields.
pub fn lllvar(len: usize) -> String {
    format!("{len:04}")
}
