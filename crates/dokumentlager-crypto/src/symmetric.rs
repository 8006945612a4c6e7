//! Symmetric encryption using AES-256-GCM
//!
//! Frame payloads of an envelope are sealed with a DEK. Nonces are derived
//! deterministically per frame, so a DEK must never seal two envelopes.

use crate::{
    keys::{DekKey, NONCE_SIZE},
    CryptoError, Result,
};
use aes_gcm::{
    aead::{Aead as AeadTrait, Payload},
    Aes256Gcm, KeyInit,
};
use rand::rngs::OsRng;

/// Length of the random part of a frame nonce
pub const NONCE_PREFIX_SIZE: usize = 7;

/// Authentication tag size appended to every frame
pub const TAG_SIZE: usize = 16;

/// A nonce for AEAD encryption
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nonce {
    bytes: [u8; NONCE_SIZE],
}

impl Nonce {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidCiphertext(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; NONCE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Nonce for frame `counter`: `prefix || counter (u32 BE) || final flag`.
    ///
    /// Folding the final flag into the nonce means a non-final frame can
    /// never be replayed as the last one.
    pub fn for_frame(prefix: &[u8; NONCE_PREFIX_SIZE], counter: u32, last: bool) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
        bytes[NONCE_PREFIX_SIZE..NONCE_SIZE - 1].copy_from_slice(&counter.to_be_bytes());
        bytes[NONCE_SIZE - 1] = u8::from(last);
        Self { bytes }
    }

    /// Get the nonce bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.bytes
    }
}

/// Generate a random nonce prefix for a new envelope
pub fn random_prefix() -> [u8; NONCE_PREFIX_SIZE] {
    let mut prefix = [0u8; NONCE_PREFIX_SIZE];
    rand::RngCore::fill_bytes(&mut OsRng, &mut prefix);
    prefix
}

/// AES-256-GCM bound to one DEK
pub struct Aead {
    cipher: Aes256Gcm,
}

impl Aead {
    /// Create a new AEAD instance with the given key
    pub fn new(key: &DekKey) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt data with the given nonce and associated data
    pub fn encrypt_with_aad(&self, nonce: &Nonce, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce_arr = aes_gcm::Nonce::from_slice(nonce.as_bytes());
        self.cipher
            .encrypt(nonce_arr, Payload { msg: plaintext, aad })
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Decrypt data with the given nonce and associated data
    pub fn decrypt_with_aad(&self, nonce: &Nonce, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce_arr = aes_gcm::Nonce::from_slice(nonce.as_bytes());
        self.cipher
            .decrypt(nonce_arr, Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::Decryption("frame authentication failed".to_string()))
    }
}
