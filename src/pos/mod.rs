//! Terminal sessions: sign-on, working key download, transactions.

mod client;
mod field55;
mod response;

#[cfg(test)]
mod tests;

pub use client::{
    IcRefundRequest, IcReversalRequest, IcTradeRequest, ScriptNotifyRequest, TcUploadRequest,
    TradeRequest, UnipayClient, UnipayConfig,
};
pub use field55::IcTags;
pub use response::{IcTradeOutcome, RegisterOutcome, StatusOutcome, TradeOutcome};
