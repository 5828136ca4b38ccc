//! Raw TCP exchange with 2-byte big-endian length framing.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{PosError, Result};

/// One-connection-per-call TCP channel to the acquirer front end.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Write the framed request, then read the 2-byte length header and
    /// exactly that many body bytes. Returns the full framed response.
    pub(crate) async fn exchange(&self, framed: &[u8]) -> Result<Vec<u8>> {
        let addr = format!("{}:{}", self.host, self.port);
        debug!("connecting to acquirer at {addr}");
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| PosError::TransportIo(format!("connect {addr}: {e}")))?;

        stream
            .write_all(framed)
            .await
            .map_err(|e| PosError::TransportIo(format!("write: {e}")))?;
        debug!("sent {} bytes", framed.len());

        let mut header = [0u8; 2];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| PosError::TransportIo(format!("read length header: {e}")))?;
        let length = u16::from_be_bytes(header) as usize;

        let mut response = vec![0u8; length + 2];
        response[..2].copy_from_slice(&header);
        stream
            .read_exact(&mut response[2..])
            .await
            .map_err(|e| PosError::TransportIo(format!("read body: {e}")))?;
        debug!("received {} bytes", response.len());
        Ok(response)
    }
}
