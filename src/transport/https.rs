//! HTTPS POST tunnel carrying the same framed bytes.

use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::error::{PosError, Result};

/// Fixed path of the acquirer's web transaction gateway.
pub const TUNNEL_PATH: &str = "/mjc/webtrans/VPB_lb";

/// HTTPS channel to the acquirer front end.
#[derive(Debug)]
pub struct HttpsTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpsTransport {
    /// Build the tunnel client. `ca_pem` adds a trust root; disabling
    /// `tls_verify` reproduces the legacy terminal behavior and is
    /// logged loudly.
    pub fn new(host: &str, port: u16, ca_pem: Option<&str>, tls_verify: bool) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(pem) = ca_pem {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| PosError::TransportIo(format!("bad CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if !tls_verify {
            warn!("TLS certificate verification disabled (legacy mode)");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| PosError::TransportIo(format!("TLS client setup: {e}")))?;
        Ok(Self {
            client,
            url: format!("https://{host}:{port}{TUNNEL_PATH}"),
        })
    }

    /// POST the framed request; the 2xx response body is the framed reply.
    pub(crate) async fn exchange(&self, framed: &[u8]) -> Result<Vec<u8>> {
        debug!("posting {} bytes to {}", framed.len(), self.url);
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "x-ISO-TPDU/x-auth")
            .header(ACCEPT, "*/*")
            .header(CACHE_CONTROL, "no-cache")
            .body(framed.to_vec())
            .send()
            .await
            .map_err(|e| PosError::TransportIo(format!("POST: {e}")))?;
        if !response.status().is_success() {
            return Err(PosError::TransportIo(format!(
                "gateway returned HTTP {}",
                response.status()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| PosError::TransportIo(format!("read body: {e}")))?;
        debug!("received {} bytes", body.len());
        Ok(body.to_vec())
    }
}
