//! Message assembly and disassembly.

use crate::encode::{bytes_to_hex_upper, llvar, lllvar, str_to_hex};
use crate::error::{PosError, Result};
use crate::iso8583::bitmap;
use crate::iso8583::fields::{FieldKind, field_kind};

/// Fixed 6-byte message header following the TPDU.
pub const MESSAGE_HEADER: [u8; 6] = [0x60, 0x31, 0x00, 0x31, 0x02, 0x08];

/// Nibbles skipped before the bitmap when parsing a framed response:
/// length header (4) + TPDU (10) + message header (12) + MTI (4).
const PREAMBLE_NIBBLES: usize = 30;

/// One field value at the codec boundary: hex nibbles, possibly odd for
/// nibble-declared variable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub bit: u8,
    pub value: String,
    declared: Option<usize>,
}

impl Field {
    pub fn new(bit: u8, value: impl Into<String>) -> Self {
        Self { bit, value: value.into(), declared: None }
    }

    /// Field with an explicit declared length overriding the one derived
    /// from the value (the TC-upload trailer declares 21 bytes but
    /// carries 23 on the wire).
    pub fn with_declared(bit: u8, value: impl Into<String>, declared: usize) -> Self {
        Self { bit, value: value.into(), declared: Some(declared) }
    }
}

/// Assemble the unframed message: TPDU || header || MTI || bitmap ||
/// fields ascending. `with_mac` sets bit 64 in the bitmap; the caller
/// computes and appends the 8-byte MAC afterwards.
pub fn build(tpdu: &[u8], mti: &str, fields: &[Field], with_mac: bool) -> Result<Vec<u8>> {
    let mut sorted: Vec<&Field> = fields.iter().collect();
    sorted.sort_by_key(|f| f.bit);
    for pair in sorted.windows(2) {
        if pair[0].bit == pair[1].bit {
            return Err(PosError::Encoding(format!("duplicate bit {}", pair[0].bit)));
        }
    }

    let mut bits: Vec<u8> = sorted.iter().map(|f| f.bit).collect();
    if with_mac {
        if bits.contains(&64) {
            return Err(PosError::Encoding("bit 64 is reserved for the MAC".to_string()));
        }
        bits.push(64);
    }

    let mut out = tpdu.to_vec();
    out.extend_from_slice(&MESSAGE_HEADER);
    out.extend(str_to_hex(mti)?);
    out.extend_from_slice(&bitmap::build(&bits)?);

    for field in sorted {
        match field_kind(field.bit)? {
            FieldKind::Fixed(n) => {
                if field.value.len() != n {
                    return Err(PosError::Encoding(format!(
                        "bit {} expects {n} nibbles, got {}",
                        field.bit,
                        field.value.len()
                    )));
                }
                out.extend(str_to_hex(&field.value)?);
            }
            FieldKind::Llvar => {
                let declared = field.declared.unwrap_or(field.value.len());
                if declared > 99 {
                    return Err(PosError::Encoding(format!("bit {} too long", field.bit)));
                }
                out.extend(str_to_hex(&llvar(declared))?);
                out.extend(str_to_hex(&field.value)?);
            }
            FieldKind::Lllvar => {
                let declared = field.declared.unwrap_or(field.value.len());
                if declared > 9999 {
                    return Err(PosError::Encoding(format!("bit {} too long", field.bit)));
                }
                out.extend(str_to_hex(&lllvar(declared))?);
                out.extend(str_to_hex(&field.value)?);
            }
            FieldKind::LllvarBytes => {
                if field.value.len() % 2 != 0 {
                    return Err(PosError::Encoding(format!(
                        "bit {} byte-counted value has odd nibble length",
                        field.bit
                    )));
                }
                let declared = field.declared.unwrap_or(field.value.len() / 2);
                if declared > 9999 {
                    return Err(PosError::Encoding(format!("bit {} too long", field.bit)));
                }
                out.extend(str_to_hex(&lllvar(declared))?);
                out.extend(str_to_hex(&field.value)?);
            }
        }
    }
    Ok(out)
}

/// Prepend the 2-byte big-endian length header counting everything after
/// itself.
pub fn frame(msg: &[u8]) -> Result<Vec<u8>> {
    if msg.len() > u16::MAX as usize {
        return Err(PosError::CodecLength(format!("message too large: {} bytes", msg.len())));
    }
    let mut framed = Vec::with_capacity(msg.len() + 2);
    framed.extend_from_slice(&(msg.len() as u16).to_be_bytes());
    framed.extend_from_slice(msg);
    Ok(framed)
}

/// Disassemble a framed message into its ordered field list. Values keep
/// their wire padding.
pub fn parse(framed: &[u8]) -> Result<Vec<Field>> {
    if framed.len() < 2 {
        return Err(PosError::CodecLength("reply shorter than length header".to_string()));
    }
    let declared = u16::from_be_bytes([framed[0], framed[1]]) as usize;
    if framed.len() != declared + 2 {
        return Err(PosError::CodecLength(format!(
            "length header says {declared}, got {} bytes",
            framed.len() - 2
        )));
    }

    let hex = bytes_to_hex_upper(framed);
    if hex.len() < PREAMBLE_NIBBLES + 16 {
        return Err(PosError::CodecLength("reply shorter than preamble + bitmap".to_string()));
    }
    let bitmap_bytes: [u8; 8] = str_to_hex(&hex[PREAMBLE_NIBBLES..PREAMBLE_NIBBLES + 16])?
        .try_into()
        .map_err(|_| PosError::CodecLength("bad bitmap".to_string()))?;
    let bits = bitmap::parse(&bitmap_bytes);

    let mut rest = &hex[PREAMBLE_NIBBLES + 16..];
    let mut out = Vec::with_capacity(bits.len());
    for bit in bits {
        let value = match field_kind(bit)? {
            FieldKind::Fixed(n) => take(&mut rest, n, bit)?,
            FieldKind::Llvar => {
                let declared = parse_prefix(take(&mut rest, 2, bit)?, bit)?;
                take(&mut rest, declared + declared % 2, bit)?
            }
            FieldKind::Lllvar => {
                let declared = parse_prefix(take(&mut rest, 4, bit)?, bit)?;
                take(&mut rest, declared + declared % 2, bit)?
            }
            FieldKind::LllvarBytes => {
                let declared = parse_prefix(take(&mut rest, 4, bit)?, bit)?;
                take(&mut rest, declared * 2, bit)?
            }
        };
        out.push(Field::new(bit, value));
    }
    Ok(out)
}

fn take<'a>(rest: &mut &'a str, n: usize, bit: u8) -> Result<&'a str> {
    if rest.len() < n {
        return Err(PosError::CodecLength(format!(
            "reply truncated in bit {bit}: need {n} nibbles, have {}",
            rest.len()
        )));
    }
    let (head, tail) = rest.split_at(n);
    *rest = tail;
    Ok(head)
}

fn parse_prefix(s: &str, bit: u8) -> Result<usize> {
    s.parse::<usize>()
        .map_err(|_| PosError::Encoding(format!("bad length prefix {s:?} in bit {bit}")))
}

/// Value of `bit` in a parsed field list.
pub fn select(fields: &[Field], bit: u8) -> Option<&str> {
    fields.iter().find(|f| f.bit == bit).map(|f| f.value.as_str())
}
