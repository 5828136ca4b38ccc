//! Per-field length semantics.
//!
//! Lengths are hex nibbles of value. LLVAR/LLLVAR prefixes are decimal
//! digits packed as BCD (1 or 2 bytes on the wire). Two prefix dialects
//! coexist: most variable fields declare a nibble count (odd counts are
//! padded to the next even nibble on the wire), while fields 44, 48, 54,
//! 55 and 61-63 declare a byte count.

use crate::error::{PosError, Result};

/// Length policy for one bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Exactly `n` nibbles of value.
    Fixed(usize),
    /// 2-digit prefix declaring a nibble count.
    Llvar,
    /// 4-digit prefix declaring a nibble count.
    Lllvar,
    /// 4-digit prefix declaring a byte count.
    LllvarBytes,
}

/// Length policy for `bit`, or `UnknownField` if the dialect does not
/// define it.
pub fn field_kind(bit: u8) -> Result<FieldKind> {
    use FieldKind::*;
    let kind = match bit {
        2 => Llvar,
        3 => Fixed(6),
        4 => Fixed(12),
        11 => Fixed(6),
        12 => Fixed(6),
        13 => Fixed(4),
        14 => Fixed(4),
        15 => Fixed(4),
        22 => Fixed(4),
        23 => Fixed(4),
        25 => Fixed(2),
        26 => Fixed(2),
        32 => Llvar,
        35 => Llvar,
        36 => Lllvar,
        37 => Fixed(24),
        38 => Fixed(12),
        39 => Fixed(4),
        41 => Fixed(16),
        42 => Fixed(30),
        // 44 declares a byte count like 55/61, unlike the other LLLVARs.
        44 => LllvarBytes,
        48 => LllvarBytes,
        49 => Fixed(6),
        52 => Fixed(16),
        53 => Fixed(16),
        54 => LllvarBytes,
        55 => LllvarBytes,
        60 => Lllvar,
        61 => LllvarBytes,
        62 => LllvarBytes,
        63 => LllvarBytes,
        64 => Fixed(16),
        _ => return Err(PosError::UnknownField(bit)),
    };
    Ok(kind)
}
