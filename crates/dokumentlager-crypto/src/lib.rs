//! # Dokumentlager Crypto
//!
//! Client-side encryption for documents sent to Dokumentlager.
//!
//! This crate provides:
//! - **Certificates**: decoding the service's PEM encoded X.509 certificate
//! - **Envelopes**: streaming, chunked AES-256-GCM with an RSA-OAEP wrapped key
//! - **Decryption**: for holders of the matching private key, mainly in tests and tooling
//!
//! ## Compatibility
//!
//! The `DLE1` envelope is this crate's own format. It is not CMS
//! EnvelopedData, and a Dokumentlager service that expects CMS cannot
//! decrypt it. Talking to such a service needs a CMS implementation of
//! [`StreamEncryptor`] plugged into the client.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dokumentlager_crypto::{EncryptionCertificate, EnvelopeEncryptor, StreamEncryptor};
//!
//! let certificate = EncryptionCertificate::from_pem(&pem)?;
//! let mut output = Vec::new();
//! EnvelopeEncryptor::new()
//!     .encrypt(&mut file, &mut output, &certificate)
//!     .await?;
//! ```

pub mod certificate;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod symmetric;

pub use certificate::{DecryptionKey, EncryptionCertificate};
pub use envelope::{EnvelopeDecryptor, EnvelopeEncryptor, FrameSealer, StreamEncryptor};
pub use error::{CryptoError, Result};
pub use keys::DekKey;

/// The version of the envelope format
pub const CRYPTO_VERSION: u8 = envelope::FORMAT_VERSION;
