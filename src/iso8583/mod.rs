//! ISO-8583 message codec for the UnionPay POS dialect.
//!
//! A message is TPDU || header || MTI || primary bitmap || fields, with a
//! 2-byte big-endian length prefix on the wire. Field lengths are counted
//! in hex nibbles; variable fields carry packed-BCD decimal prefixes.

pub mod bitmap;
pub mod fields;
pub mod message;


pub use fields::FieldKind;
pub use message::{Field, MESSAGE_HEADER};
