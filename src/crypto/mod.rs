//! Crypto backend selector.
//!
//! A session either runs the protocol crypto locally or forwards it to a
//! remote proxy fronting an HSM. The choice is fixed at construction. The
//! proxy variant ignores caller-supplied key material: the HSM holds the
//! working keys.

pub mod local;
pub mod proxy;

use crate::encode::bytes_to_hex_upper;
use crate::error::Result;
pub use proxy::CryptoProxy;

/// Where the DES / 3DES / MAC operations execute.
#[derive(Debug, Clone)]
pub enum CryptoBackend {
    /// In-process primitives, keys supplied by the session.
    Local,
    /// Remote crypto proxy; keys live in the HSM.
    Proxy(CryptoProxy),
}

impl CryptoBackend {
    pub async fn encrypt_des_ecb(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Local => Ok(local::des_ecb_encrypt(data, key)?.to_vec()),
            Self::Proxy(proxy) => proxy.encrypt_des_ecb(&bytes_to_hex_upper(data)).await,
        }
    }

    pub async fn decrypt_des_ecb(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Local => Ok(local::des_ecb_decrypt(data, key)?.to_vec()),
            Self::Proxy(proxy) => proxy.decrypt_des_ecb(&bytes_to_hex_upper(data)).await,
        }
    }

    pub async fn encrypt_tdes_ecb(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Local => local::tdes_ecb_encrypt(data, key),
            Self::Proxy(proxy) => proxy.encrypt_tdes_ecb(&bytes_to_hex_upper(data)).await,
        }
    }

    pub async fn decrypt_tdes_ecb(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Local => local::tdes_ecb_decrypt(data, key),
            Self::Proxy(proxy) => proxy.decrypt_tdes_ecb(&bytes_to_hex_upper(data)).await,
        }
    }

    /// Retail MAC over `data`. Locally the first 8 bytes of the MAC
    /// working key are used.
    pub async fn calc_mac(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Local => {
                let short_key = if key.len() > 8 { &key[..8] } else { key };
                Ok(local::retail_mac(data, short_key)?.to_vec())
            }
            Self::Proxy(proxy) => proxy.calc_mac(&bytes_to_hex_upper(data)).await,
        }
    }

    /// Sign-on passthrough: the proxy forwards the payload to the HSM,
    /// the local backend hands it back unchanged.
    pub async fn register_passthrough(&self, payload: &str) -> Result<String> {
        match self {
            Self::Local => Ok(payload.to_string()),
            Self::Proxy(proxy) => proxy.register(payload).await,
        }
    }
}
