//! Dual transport: length-prefixed raw TCP or an HTTPS POST tunnel.
//!
//! Each transaction opens and closes its own channel; there is no
//! multiplexing. A single deadline covers the whole exchange.

mod https;
mod tcp;

use std::time::Duration;

use crate::error::{PosError, Result};
pub use https::HttpsTransport;
pub use tcp::TcpTransport;

/// Reversals always use this deadline: the issuer either confirms a
/// reversal quickly or not at all.
pub const REVERSAL_TIMEOUT_MS: u64 = 5000;

/// Channel a session sends its framed messages through.
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpTransport),
    Https(HttpsTransport),
}

impl Transport {
    /// Send a framed request and collect the complete framed response,
    /// aborting with `Timeout` when the deadline expires.
    pub async fn exchange(&self, framed: &[u8], timeout_ms: u64) -> Result<Vec<u8>> {
        let call = async {
            match self {
                Self::Tcp(tcp) => tcp.exchange(framed).await,
                Self::Https(https) => https.exchange(framed).await,
            }
        };
        tokio::time::timeout(Duration::from_millis(timeout_ms), call)
            .await
            .map_err(|_| PosError::Timeout(timeout_ms))?
    }
}
