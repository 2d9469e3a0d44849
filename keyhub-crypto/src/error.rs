//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors produced by the key codec, JOSE envelopes and key hierarchy.
///
/// Every variant is terminal: callers never receive partial plaintext
/// alongside an error.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The decoded key is not a P-384 EC key of the expected kind.
    #[error("not an EC P-384 key: {0}")]
    NotEcKey(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Structural JOSE error (wrong number of segments, bad base64, missing header field).
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature verification failed: {0}")]
    Signature(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
