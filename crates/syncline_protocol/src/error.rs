//! Error types for protocol encoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON body could not be decoded.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// CBOR snapshot could not be encoded.
    #[error("cbor encode failed: {0}")]
    CborEncode(String),

    /// CBOR snapshot could not be decoded.
    #[error("cbor decode failed: {0}")]
    CborDecode(String),
}

impl ProtocolError {
    pub(crate) fn cbor_encode(err: impl std::fmt::Display) -> Self {
        Self::CborEncode(err.to_string())
    }

    pub(crate) fn cbor_decode(err: impl std::fmt::Display) -> Self {
        Self::CborDecode(err.to_string())
    }
}
