//! Process-wide cache of the service's encryption certificate

use crate::{api::DocumentApi, ClientError, Result};
use dokumentlager_crypto::EncryptionCertificate;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Fetches the public certificate on first use and keeps it for the
/// lifetime of the client. Concurrent first callers share one fetch. A
/// failed fetch is not cached.
#[derive(Debug, Default)]
pub struct CertificateCache {
    cell: OnceCell<Arc<EncryptionCertificate>>,
}

impl CertificateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache pre-filled with a known certificate
    pub fn with_certificate(certificate: EncryptionCertificate) -> Self {
        Self {
            cell: OnceCell::new_with(Some(Arc::new(certificate))),
        }
    }

    pub fn cached(&self) -> Option<Arc<EncryptionCertificate>> {
        self.cell.get().cloned()
    }

    pub async fn get(&self, api: &DocumentApi) -> Result<Arc<EncryptionCertificate>> {
        self.cell
            .get_or_try_init(|| fetch(api))
            .await
            .cloned()
    }
}

async fn fetch(api: &DocumentApi) -> Result<Arc<EncryptionCertificate>> {
    debug!("Fetching public certificate");
    let pem = api.public_key().await.map_err(|e| {
        warn!(error = %e, "Public certificate could not be fetched");
        ClientError::CertificateResolution(Box::new(e))
    })?;

    let certificate = EncryptionCertificate::from_pem(&pem.result).map_err(|e| {
        warn!(error = %e, "Public certificate could not be decoded");
        ClientError::CertificateResolution(Box::new(e))
    })?;
    debug!(subject = certificate.subject(), fingerprint = certificate.fingerprint(), "Public certificate cached");
    Ok(Arc::new(certificate))
}
