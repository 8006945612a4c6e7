//! Recipient certificates and private keys
//!
//! The service publishes its encryption certificate as PEM text. Only the
//! RSA public key inside it is used; chain and validity checks are left to
//! the service, which owns the key.

use crate::{CryptoError, Result};
use base64::Engine;
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    traits::PublicKeyParts,
    RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha256};
use x509_cert::{
    der::{Decode, Encode},
    Certificate,
};

/// Decode the base64 body of a PEM document, ignoring marker lines.
///
/// Text without markers is accepted as a bare base64 body.
pub fn pem_body(pem: &str) -> Result<Vec<u8>> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .flat_map(|line| line.chars().filter(|c| !c.is_whitespace()))
        .collect();
    if body.is_empty() {
        return Err(CryptoError::InvalidCertificate("PEM body is empty".to_string()));
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(body)?)
}

/// The service's X.509 encryption certificate
#[derive(Clone)]
pub struct EncryptionCertificate {
    subject: String,
    fingerprint: String,
    public_key: RsaPublicKey,
}

impl EncryptionCertificate {
    /// Parse a PEM encoded X.509 certificate
    pub fn from_pem(pem: &str) -> Result<Self> {
        Self::from_der(&pem_body(pem)?)
    }

    /// Parse a DER encoded X.509 certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let certificate = Certificate::from_der(der)
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;

        let spki = certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        let public_key = RsaPublicKey::from_public_key_der(&spki)
            .map_err(|e| CryptoError::InvalidKey(format!("certificate key is not RSA: {}", e)))?;

        let subject = certificate.tbs_certificate.subject.to_string();
        let fingerprint = hex::encode(Sha256::digest(der));

        tracing::debug!(%subject, %fingerprint, bits = public_key.size() * 8, "Decoded encryption certificate");

        Ok(Self {
            subject,
            fingerprint,
            public_key,
        })
    }

    /// Distinguished name of the certificate subject
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Hex encoded SHA-256 of the certificate DER
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

impl std::fmt::Debug for EncryptionCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionCertificate")
            .field("subject", &self.subject)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// RSA private key matching an [`EncryptionCertificate`]
pub struct DecryptionKey {
    private_key: RsaPrivateKey,
}

impl DecryptionKey {
    /// Parse a PKCS#8 PEM private key (`BEGIN PRIVATE KEY`)
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = pem_body(pem).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let private_key = RsaPrivateKey::from_pkcs8_der(&der)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { private_key })
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

impl std::fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DecryptionKey([REDACTED])")
    }
}
