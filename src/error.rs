//! Error types and handling.

use thiserror::Error;

/// Errors surfaced by the UnionPay protocol client.
#[derive(Error, Debug)]
pub enum PosError {
    /// Malformed hex or length-prefix input.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Parse hit a bit position with no entry in the field table.
    #[error("Unknown ISO-8583 field: bit {0}")]
    UnknownField(u8),

    /// Reply truncated or length header inconsistent.
    #[error("Message length error: {0}")]
    CodecLength(String),

    /// Crypto input not the required block length.
    #[error("Crypto length error: {0}")]
    CryptoLength(String),

    /// Crypto proxy returned an error or a non-2xx status.
    #[error("Crypto proxy failed: {0}")]
    ProxyFail(String),

    /// Socket or TLS failure before the response completed.
    #[error("Transport error: {0}")]
    TransportIo(String),

    /// Deadline expired before the response completed.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Transaction attempted before a successful sign-on.
    #[error("Terminal not registered: working keys missing")]
    NotRegistered,
}

/// Result type alias for PosError
pub type Result<T> = std::result::Result<T, PosError>;
