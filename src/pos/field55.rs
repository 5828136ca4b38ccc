//! EMV field-55 payload builders.
//!
//! Each transaction kind sends a fixed tag sequence; only the card-derived
//! values vary. The blobs returned here are hex strings ready to drop into
//! bit 55, whose byte-count prefix the codec adds.

use crate::encode::{Align, bytes_to_hex_upper, num_to_ascii, str_to_hex_padded};
use crate::error::{PosError, Result};
use crate::tlv;

/// Card-derived EMV values collected by the terminal.
#[derive(Debug, Clone, Default)]
pub struct IcTags {
    /// Application cryptogram (9F26).
    pub secret: String,
    /// Issuer application data (9F10).
    pub issuer_info: String,
    /// Unpredictable number (9F37).
    pub unpredictable: String,
    /// Application transaction counter (9F36).
    pub counter: String,
    /// Transaction date from the card (9A).
    pub trade_date: String,
    /// Issuer script result (DF31), script notification only.
    pub script_status: Option<String>,
}

// Terminal profile constants shared by every payload.
const TVR: &str = "008004E000";
const AIP: &str = "7C00";
const COUNTRY_CODE: &str = "0156";
const CURRENCY_CODE: &str = "0156";
const TERMINAL_CAPS: &str = "E0E9C8";
const CVM_RESULTS: &str = "020300";
const TERMINAL_TYPE: &str = "22";
const TXN_TYPE: &str = "00";
const OTHER_AMOUNT: &str = "000000000000";
const DDF_NAME: &str = "315041592E5359532E4444463031";
const NO_SCRIPT_RESULT: &str = "0000000000";

/// Authorization request payload (9F27 = 80).
pub(crate) fn arqc_blob(
    tags: &IcTags,
    price: u64,
    device_no: &str,
    serial_no: &str,
) -> Result<String> {
    online_blob(tags, "80", price, device_no, serial_no)
}

/// Transaction certificate upload payload (9F27 = 40).
pub(crate) fn tc_blob(
    tags: &IcTags,
    price: u64,
    device_no: &str,
    serial_no: &str,
) -> Result<String> {
    online_blob(tags, "40", price, device_no, serial_no)
}

fn online_blob(
    tags: &IcTags,
    cryptogram_info: &str,
    price: u64,
    device_no: &str,
    serial_no: &str,
) -> Result<String> {
    let device_hex = bytes_to_hex_upper(device_no.as_bytes());
    let serial_hex = bytes_to_hex_upper(&str_to_hex_padded(serial_no, 4, Align::Left)?);
    let mut blob = Vec::new();
    for (tag, value) in [
        ("9F26", tags.secret.as_str()),
        ("9F27", cryptogram_info),
        ("9F10", tags.issuer_info.as_str()),
        ("9F37", tags.unpredictable.as_str()),
        ("9F36", tags.counter.as_str()),
        ("95", TVR),
        ("9A", tags.trade_date.as_str()),
        ("9C", TXN_TYPE),
        ("9F02", &num_to_ascii(price, 12)),
        ("5F2A", CURRENCY_CODE),
        ("82", AIP),
        ("9F1A", COUNTRY_CODE),
        ("9F03", OTHER_AMOUNT),
        ("9F33", TERMINAL_CAPS),
        ("9F34", CVM_RESULTS),
        ("9F35", TERMINAL_TYPE),
        ("9F1E", &device_hex),
        ("84", DDF_NAME),
        ("9F41", &serial_hex),
    ] {
        blob.extend(tlv::primitive(tag, value)?);
    }
    Ok(bytes_to_hex_upper(&blob))
}

/// Reversal payload: minimal card data plus an all-zero script result.
pub(crate) fn reversal_blob(tags: &IcTags) -> Result<String> {
    let mut blob = Vec::new();
    for (tag, value) in [
        ("95", TVR),
        ("9F10", tags.issuer_info.as_str()),
        ("9F36", tags.counter.as_str()),
        ("DF31", NO_SCRIPT_RESULT),
    ] {
        blob.extend(tlv::primitive(tag, value)?);
    }
    Ok(bytes_to_hex_upper(&blob))
}

/// Issuer script result notification payload.
pub(crate) fn script_notify_blob(tags: &IcTags) -> Result<String> {
    let script_status = tags
        .script_status
        .as_deref()
        .ok_or_else(|| PosError::Encoding("script notification needs a script status".to_string()))?;
    let mut blob = Vec::new();
    for (tag, value) in [
        ("9F33", TERMINAL_CAPS),
        ("95", TVR),
        ("9F37", tags.unpredictable.as_str()),
        ("9F10", tags.issuer_info.as_str()),
        ("9F26", tags.secret.as_str()),
        ("9F36", tags.counter.as_str()),
        ("82", AIP),
        ("DF31", script_status),
        ("9F1A", COUNTRY_CODE),
        ("9A", tags.trade_date.as_str()),
    ] {
        blob.extend(tlv::primitive(tag, value)?);
    }
    Ok(bytes_to_hex_upper(&blob))
}
