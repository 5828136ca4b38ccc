//! Remote crypto proxy HTTP client.
//!
//! When the terminal keys live in an HSM the cryptography is delegated to a
//! small HTTP service. Every endpoint takes and returns `{"data": "<hex>"}`;
//! the key material never leaves the proxy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{PosError, Result};

#[derive(Serialize)]
struct ProxyRequest<'a> {
    data: &'a str,
}

#[derive(Deserialize)]
struct ProxyResponse {
    data: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

/// Stateless client for the crypto proxy service; safe to share between
/// sessions.
#[derive(Debug, Clone)]
pub struct CryptoProxy {
    client: reqwest::Client,
    base_url: String,
}

impl CryptoProxy {
    /// Create a proxy client for the given base URL (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post(&self, path: &str, data: &str) -> Result<String> {
        let url = format!("{}{path}", self.base_url);
        debug!("crypto proxy call: {path}");
        let response = self
            .client
            .post(&url)
            .json(&ProxyRequest { data })
            .send()
            .await
            .map_err(|e| PosError::ProxyFail(format!("{path}: {e}")))?;
        if !response.status().is_success() {
            return Err(PosError::ProxyFail(format!(
                "{path}: HTTP {}",
                response.status()
            )));
        }
        let body: ProxyResponse = response
            .json()
            .await
            .map_err(|e| PosError::ProxyFail(format!("{path}: bad body: {e}")))?;
        if let Some(err) = body.error.filter(is_truthy) {
            return Err(PosError::ProxyFail(format!("{path}: {err}")));
        }
        body.data
            .ok_or_else(|| PosError::ProxyFail(format!("{path}: missing data")))
    }

    /// Forward a sign-on payload to the HSM; returns the hex response.
    pub async fn register(&self, payload: &str) -> Result<String> {
        self.post("/register", payload).await
    }

    pub async fn encrypt_des_ecb(&self, data: &str) -> Result<Vec<u8>> {
        let hex = self.post("/encrypt/desecb", data).await?;
        crate::encode::str_to_hex(&hex)
    }

    pub async fn decrypt_des_ecb(&self, data: &str) -> Result<Vec<u8>> {
        let hex = self.post("/decrypt/desecb", data).await?;
        crate::encode::str_to_hex(&hex)
    }

    pub async fn encrypt_tdes_ecb(&self, data: &str) -> Result<Vec<u8>> {
        let hex = self.post("/encrypt/3desecb", data).await?;
        crate::encode::str_to_hex(&hex)
    }

    pub async fn decrypt_tdes_ecb(&self, data: &str) -> Result<Vec<u8>> {
        let hex = self.post("/decrypt/3desecb", data).await?;
        crate::encode::str_to_hex(&hex)
    }

    pub async fn calc_mac(&self, data: &str) -> Result<Vec<u8>> {
        let hex = self.post("/calcMac", data).await?;
        crate::encode::str_to_hex(&hex)
    }
}

/// The proxy service signals failure with any truthy `error` value.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
