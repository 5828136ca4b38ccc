//! Typed transaction outcomes and the field extraction behind them.

use crate::encode::str_to_hex;
use crate::error::{PosError, Result};
use crate::iso8583::message::{Field, select};
use crate::tlv;

/// Response code meaning the host approved the request.
pub const APPROVED: &str = "3030";

/// Sign-on result. Key material is only present when the host approved
/// and the session decrypts locally; with a crypto proxy the working keys
/// stay inside the HSM.
#[derive(Debug, Clone, Default)]
pub struct RegisterOutcome {
    /// Raw response code (bit 39 nibbles).
    pub status: String,
    /// Working PIN key, uppercase hex (16 bytes).
    pub p_key: Option<String>,
    /// Working MAC key, uppercase hex (8 bytes).
    pub m_key: Option<String>,
    /// Batch number assigned by the host.
    pub batch_no: Option<String>,
    /// Undeciphered check nibbles trailing each downloaded key.
    pub key_check: Option<(String, String)>,
}

/// Magstripe purchase result.
#[derive(Debug, Clone, Default)]
pub struct TradeOutcome {
    pub status: String,
    /// Retrieval reference number, ASCII decoded.
    pub retrieval_no: Option<String>,
    pub trade_time: Option<String>,
    pub trade_date: Option<String>,
}

/// IC purchase result: the magstripe fields plus the issuer's EMV reply.
#[derive(Debug, Clone, Default)]
pub struct IcTradeOutcome {
    pub status: String,
    pub retrieval_no: Option<String>,
    pub trade_time: Option<String>,
    pub trade_date: Option<String>,
    /// Issuer authentication data (tag 91), uppercase hex.
    pub arpc: Option<String>,
    /// Issuer script contents (tag 72's 86 children), comma separated hex.
    pub scripts: Option<String>,
    /// Application transaction counter echoed by the issuer (9F36).
    pub script_id: Option<String>,
}

/// Result of operations that only report a response code.
#[derive(Debug, Clone, Default)]
pub struct StatusOutcome {
    pub status: String,
}

impl RegisterOutcome {
    pub fn approved(&self) -> bool {
        self.status == APPROVED
    }
}

impl TradeOutcome {
    pub fn approved(&self) -> bool {
        self.status == APPROVED
    }
}

impl IcTradeOutcome {
    pub fn approved(&self) -> bool {
        self.status == APPROVED
    }
}

impl StatusOutcome {
    pub fn approved(&self) -> bool {
        self.status == APPROVED
    }
}

/// Bit 39 as received, empty when the host omitted it.
pub(crate) fn status_of(fields: &[Field]) -> String {
    select(fields, 39).unwrap_or_default().to_string()
}

pub(crate) fn status_outcome(fields: &[Field]) -> StatusOutcome {
    StatusOutcome { status: status_of(fields) }
}

pub(crate) fn trade_outcome(fields: &[Field]) -> Result<TradeOutcome> {
    let mut outcome = TradeOutcome { status: status_of(fields), ..Default::default() };
    if outcome.approved() {
        outcome.retrieval_no = select(fields, 37).map(ascii_of).transpose()?;
        outcome.trade_time = select(fields, 12).map(str::to_string);
        outcome.trade_date = select(fields, 13).map(str::to_string);
    }
    Ok(outcome)
}

pub(crate) fn ic_trade_outcome(fields: &[Field]) -> Result<IcTradeOutcome> {
    let base = trade_outcome(fields)?;
    let mut outcome = IcTradeOutcome {
        status: base.status,
        retrieval_no: base.retrieval_no,
        trade_time: base.trade_time,
        trade_date: base.trade_date,
        ..Default::default()
    };
    if outcome.approved()
        && let Some(blob) = select(fields, 55)
    {
        let nodes = tlv::parse(&str_to_hex(blob)?)?;
        outcome.arpc = tlv::find(&nodes, "91").map(|n| crate::encode::bytes_to_hex_upper(&n.value));
        if let Some(scripts) = tlv::find(&nodes, "72") {
            let joined: Vec<String> = scripts
                .children
                .iter()
                .filter(|c| c.tag == "86")
                .map(|c| crate::encode::bytes_to_hex_upper(&c.value))
                .collect();
            outcome.scripts = Some(joined.join(","));
        }
        outcome.script_id =
            tlv::find(&nodes, "9F36").map(|n| crate::encode::bytes_to_hex_upper(&n.value));
    }
    Ok(outcome)
}

/// Decode a field carrying ASCII bytes as hex nibbles.
fn ascii_of(nibbles: &str) -> Result<String> {
    String::from_utf8(str_to_hex(nibbles)?)
        .map_err(|e| PosError::Encoding(format!("non-ASCII field content: {e}")))
}
