//! China UnionPay POS acquiring protocol client.
//!
//! Speaks the UnionPay ISO-8583 dialect over a length-prefixed raw TCP
//! channel or an HTTPS POST tunnel, for terminal sign-on (working-key
//! download), magstripe and IC-card purchases, IC reversals and refunds,
//! TC upload and issuer-script result notification.

pub mod crypto;
pub mod encode;
pub mod error;
pub mod iso8583;
pub mod pos;
pub mod tlv;
pub mod transport;

pub use error::{PosError, Result};
pub use pos::{
    IcRefundRequest, IcReversalRequest, IcTags, IcTradeOutcome, IcTradeRequest, RegisterOutcome,
    ScriptNotifyRequest, StatusOutcome, TcUploadRequest, TradeOutcome, TradeRequest, UnipayClient,
    UnipayConfig,
};
