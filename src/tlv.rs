//! BER-TLV codec for the EMV field-55 payloads.
//!
//! Requests only ever carry primitive TLVs. Response parsing additionally
//! walks constructed nodes (issuer scripts arrive as tag 72 wrapping 86
//! children).

use crate::encode::{bytes_to_hex_upper, str_to_hex};
use crate::error::{PosError, Result};

/// A parsed TLV node. `value` is the raw content octets; `children` is
/// populated for constructed nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// Uppercase hex tag identifier, e.g. "9F26".
    pub tag: String,
    pub value: Vec<u8>,
    pub children: Vec<Tlv>,
}

impl Tlv {
    pub fn is_constructed(&self) -> bool {
        !self.children.is_empty()
    }

    /// Re-emit tag, length and raw content octets.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let tag_bytes = str_to_hex(&self.tag)?;
        let mut out = tag_bytes;
        push_length(&mut out, self.value.len());
        out.extend_from_slice(&self.value);
        Ok(out)
    }
}

fn push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.push(0x81);
        out.push(len as u8);
    } else {
        out.push(0x82);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    }
}

/// Build a primitive TLV from hex tag and hex value.
pub fn primitive(tag: &str, value: &str) -> Result<Vec<u8>> {
    if tag.is_empty() || tag.len() % 2 != 0 {
        return Err(PosError::Encoding(format!("bad TLV tag {tag:?}")));
    }
    let tag_bytes = str_to_hex(tag)?;
    if value.len() % 2 != 0 {
        return Err(PosError::Encoding(format!(
            "odd TLV value length for tag {tag}"
        )));
    }
    let value_bytes = str_to_hex(value)?;
    let mut out = tag_bytes;
    push_length(&mut out, value_bytes.len());
    out.extend_from_slice(&value_bytes);
    Ok(out)
}

/// Parse a sequence of TLV nodes, recursing into constructed ones.
pub fn parse(data: &[u8]) -> Result<Vec<Tlv>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let tag_start = pos;
        let first = data[pos];
        pos += 1;
        // Multi-byte tag: low 5 bits all set, continuation while bit 8 set.
        if first & 0x1F == 0x1F {
            loop {
                let b = *data
                    .get(pos)
                    .ok_or_else(|| PosError::CodecLength("TLV tag truncated".to_string()))?;
                pos += 1;
                if b & 0x80 == 0 {
                    break;
                }
            }
        }
        let tag = bytes_to_hex_upper(&data[tag_start..pos]);

        let len_byte = *data
            .get(pos)
            .ok_or_else(|| PosError::CodecLength(format!("TLV {tag} missing length")))?;
        pos += 1;
        let len = if len_byte < 0x80 {
            len_byte as usize
        } else {
            let n = (len_byte & 0x7F) as usize;
            if n == 0 || n > 3 {
                return Err(PosError::Encoding(format!(
                    "TLV {tag} has unsupported length form {len_byte:#04X}"
                )));
            }
            let mut len = 0usize;
            for _ in 0..n {
                let b = *data
                    .get(pos)
                    .ok_or_else(|| PosError::CodecLength(format!("TLV {tag} length truncated")))?;
                pos += 1;
                len = (len << 8) | b as usize;
            }
            len
        };

        let value = data
            .get(pos..pos + len)
            .ok_or_else(|| PosError::CodecLength(format!("TLV {tag} value truncated")))?
            .to_vec();
        pos += len;

        let children = if first & 0x20 != 0 {
            parse(&value)?
        } else {
            Vec::new()
        };
        out.push(Tlv { tag, value, children });
    }
    Ok(out)
}

/// First node with the given tag, searching the top level only.
pub fn find<'a>(nodes: &'a [Tlv], tag: &str) -> Option<&'a Tlv> {
    nodes.iter().find(|n| n.tag == tag)
}
