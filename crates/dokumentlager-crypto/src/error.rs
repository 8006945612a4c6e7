//! Error types for the dokumentlager-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The certificate could not be decoded or carries an unusable key
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Invalid ciphertext format
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// The envelope ended before its final frame
    #[error("ciphertext truncated: {0}")]
    Truncated(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Base64 decode error
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl CryptoError {
    /// True when the failure came from the underlying reader or writer
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
