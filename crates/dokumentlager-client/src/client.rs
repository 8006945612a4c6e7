//! Dokumentlager client

use crate::{
    api::DocumentApi,
    auth::AuthenticationStrategy,
    certificate::CertificateCache,
    encryption::EncryptionJob,
    input::{BoundedInput, DocumentSource, InputMonitor},
    lazy::{Download, LazyDownload},
    path::{DefaultPathHandler, PathHandler},
    pipe::{relay_pipe, PipeError, PipeErrorSlot},
    transport::{DocumentReader, DocumentStream, HttpTransport, Transport},
    worker::{TaskError, WorkerPool},
    ClientConfig, ClientError, DocumentMetadataUpload, DocumentResponse, DownloadMetadata,
    MetadataUpdate, MetadataUpdateResult, Result, SearchResult, UploadResult,
};
use dokumentlager_crypto::{EncryptionCertificate, EnvelopeEncryptor, StreamEncryptor};
use std::{io, sync::Arc, time::Duration};
use tokio::io::AsyncRead;
use tracing::{debug, error, info_span, instrument, warn};
use uuid::Uuid;

/// One document to upload
pub struct UploadRequest {
    content: DocumentSource,
    metadata: DocumentMetadataUpload,
    organization_id: Uuid,
    account_id: Uuid,
    encrypt: Option<bool>,
    max_size: u64,
    size_hint: Option<u64>,
    request_id: Option<String>,
}

impl UploadRequest {
    pub fn new<R>(content: R, metadata: DocumentMetadataUpload, organization_id: Uuid, account_id: Uuid) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            content: Box::new(content),
            metadata,
            organization_id,
            account_id,
            encrypt: None,
            max_size: 0,
            size_hint: None,
            request_id: None,
        }
    }

    /// Encrypt or not, regardless of the security level.
    /// Left unset, levels above 3 are encrypted.
    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = Some(encrypt);
        self
    }

    /// Reject documents larger than `max_size` bytes. 0 means no limit.
    pub fn max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Known document size, checked against the limit before reading
    pub fn size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    /// Id sent as the `requestid` header and attached to log events
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn metadata(&self) -> &DocumentMetadataUpload {
        &self.metadata
    }

    /// Whether this upload will be encrypted
    pub fn should_encrypt(&self) -> bool {
        self.encrypt
            .unwrap_or_else(|| self.metadata.requires_encryption())
    }
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("metadata", &self.metadata)
            .field("organization_id", &self.organization_id)
            .field("account_id", &self.account_id)
            .field("encrypt", &self.encrypt)
            .field("max_size", &self.max_size)
            .field("size_hint", &self.size_hint)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// Dokumentlager client.
///
/// Cheap to clone; clones share the certificate cache and the worker pool.
#[derive(Clone)]
pub struct DocumentClient {
    api: DocumentApi,
    certificates: Arc<CertificateCache>,
    pool: WorkerPool,
    encryptor: Arc<dyn StreamEncryptor>,
    encryption_grace: Duration,
    pipe_capacity: usize,
}

impl DocumentClient {
    /// Create a client talking HTTP to the services in `config`
    pub fn new(config: ClientConfig, auth: Arc<dyn AuthenticationStrategy>) -> Result<Self> {
        let transport = HttpTransport::new(&config, auth)?;
        Ok(Self::builder(Arc::new(transport)).config(&config).build())
    }

    pub fn builder(transport: Arc<dyn Transport>) -> DocumentClientBuilder {
        DocumentClientBuilder::new(transport)
    }

    /// The endpoint level API this client is built on
    pub fn api(&self) -> &DocumentApi {
        &self.api
    }

    /// Upload a document, encrypting it on the way if required
    #[instrument(
        skip_all,
        fields(
            organization_id = %request.organization_id,
            account_id = %request.account_id,
            request_id = request.request_id.as_deref(),
        )
    )]
    pub async fn upload(&self, request: UploadRequest) -> Result<DocumentResponse<UploadResult>> {
        let encrypt = request.should_encrypt();
        let UploadRequest {
            content,
            metadata,
            organization_id,
            account_id,
            max_size,
            size_hint,
            request_id,
            ..
        } = request;

        if let Some(size) = size_hint {
            if max_size > 0 && size > max_size {
                return Err(ClientError::DocumentTooLarge { limit: max_size });
            }
        }
        let input = BoundedInput::guard(content, max_size).await?;
        let monitor = input.monitor();

        if !encrypt {
            debug!("Streaming document unencrypted");
            return self
                .api
                .upload_document(
                    DocumentStream::from_reader(input),
                    &metadata,
                    organization_id,
                    account_id,
                    false,
                    request_id,
                )
                .await
                .map_err(|err| most_specific(err, &monitor, None, max_size));
        }

        let certificate = self.certificates.get(&self.api).await?;
        let (writer, reader) = relay_pipe(self.pipe_capacity);
        let slot = writer.error_slot();
        let job = EncryptionJob::new(input, writer, certificate, self.encryptor.clone())
            .in_span(info_span!("encryption", request_id = request_id.as_deref()));
        let task = self.pool.spawn(move |cancel| job.run(cancel));

        debug!("Streaming document encrypted");
        let outcome = self
            .api
            .upload_document(
                DocumentStream::from_stream(reader),
                &metadata,
                organization_id,
                account_id,
                true,
                request_id,
            )
            .await;

        match outcome {
            Ok(response) => match task.join(self.encryption_grace).await {
                Ok(Ok(consumed)) => {
                    debug!(consumed, "Encrypted upload complete");
                    Ok(response)
                }
                Err(TaskError::TimedOut(grace)) => {
                    warn!(?grace, "Encryption task outlived its grace period after a successful upload");
                    Ok(response)
                }
                Ok(Err(err)) => {
                    error!(error = %err, "Encryption failed after the upload was accepted");
                    Err(ClientError::Encryption(match err {
                        PipeError::Encryption(message) => message,
                        other => other.to_string(),
                    }))
                }
                Err(err) => {
                    error!(error = %err, "Encryption task failed after the upload was accepted");
                    Err(err.into())
                }
            },
            Err(err) => {
                task.cancel();
                if let Err(TaskError::TimedOut(grace)) = task.join(self.encryption_grace).await {
                    warn!(?grace, "Encryption task did not stop after a failed upload");
                }
                Err(most_specific(err, &monitor, Some(&slot), max_size))
            }
        }
    }

    /// Upload bytes that are already encrypted for the service
    #[instrument(skip_all, fields(organization_id = %request.organization_id, account_id = %request.account_id))]
    pub async fn upload_already_encrypted(&self, request: UploadRequest) -> Result<DocumentResponse<UploadResult>> {
        let UploadRequest {
            content,
            metadata,
            organization_id,
            account_id,
            max_size,
            request_id,
            ..
        } = request;

        let input = BoundedInput::guard(content, max_size).await?;
        let monitor = input.monitor();
        self.api
            .upload_document(
                DocumentStream::from_reader(input),
                &metadata,
                organization_id,
                account_id,
                true,
                request_id,
            )
            .await
            .map_err(|err| most_specific(err, &monitor, None, max_size))
    }

    pub async fn update_metadata(
        &self,
        organization_id: Uuid,
        account_id: Uuid,
        document_id: Uuid,
        update: &MetadataUpdate,
    ) -> Result<DocumentResponse<MetadataUpdateResult>> {
        self.api
            .update_metadata(organization_id, account_id, document_id, update)
            .await
    }

    pub async fn delete(&self, organization_id: Uuid, account_id: Uuid, document_id: Uuid) -> Result<DocumentResponse<()>> {
        self.api.delete(organization_id, account_id, document_id).await
    }

    pub async fn delete_by_correlation_id(
        &self,
        organization_id: Uuid,
        account_id: Uuid,
        correlation_id: Uuid,
    ) -> Result<DocumentResponse<()>> {
        self.api
            .delete_by_correlation_id(organization_id, account_id, correlation_id)
            .await
    }

    /// Send the download request now and return the streaming body
    pub async fn download(&self, document_id: Uuid) -> Result<DocumentResponse<DocumentReader>> {
        self.api.download(document_id).await
    }

    /// Defer the download request until the result is first used
    pub fn download_lazy(&self, document_id: Uuid) -> Download {
        let api = self.api.clone();
        Download::Lazy(LazyDownload::new(move || async move { api.download(document_id).await }))
    }

    pub async fn download_metadata(&self, document_id: Uuid) -> Result<DocumentResponse<DownloadMetadata>> {
        self.api.download_metadata(document_id).await
    }

    pub async fn search_by_correlation_id(
        &self,
        organization_id: Uuid,
        account_id: Uuid,
        correlation_id: Uuid,
        from: u32,
        to: u32,
    ) -> Result<DocumentResponse<SearchResult>> {
        self.api
            .search_by_correlation_id(organization_id, account_id, correlation_id, from, to)
            .await
    }

    /// The service certificate as PEM text, fetched fresh
    pub async fn public_key(&self) -> Result<DocumentResponse<String>> {
        self.api.public_key().await
    }

    /// The service certificate used for encryption, from the cache
    pub async fn public_certificate(&self) -> Result<Arc<EncryptionCertificate>> {
        self.certificates.get(&self.api).await
    }
}

impl std::fmt::Debug for DocumentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentClient")
            .field("pool_size", &self.pool.size())
            .field("encryption_grace", &self.encryption_grace)
            .field("pipe_capacity", &self.pipe_capacity)
            .finish_non_exhaustive()
    }
}

/// Pick the error that best explains a failed upload. A passed size limit
/// wins, then a failed read of the caller's source, then a failure inside
/// the encryption task, then the request's own error.
fn most_specific(err: ClientError, monitor: &InputMonitor, slot: Option<&PipeErrorSlot>, max_size: u64) -> ClientError {
    if monitor.tripped() {
        return ClientError::DocumentTooLarge { limit: max_size };
    }
    if let Some(read_failure) = monitor.read_failure() {
        return ClientError::Io(read_failure);
    }
    match slot.and_then(PipeErrorSlot::error) {
        Some(PipeError::LimitExceeded(limit)) => ClientError::DocumentTooLarge { limit },
        Some(PipeError::Encryption(message)) => ClientError::Encryption(message),
        Some(PipeError::Source(message)) => ClientError::Io(io::Error::new(io::ErrorKind::Other, message)),
        Some(PipeError::Cancelled) | None => err,
    }
}

/// Builder for [`DocumentClient`]
pub struct DocumentClientBuilder {
    transport: Arc<dyn Transport>,
    paths: Arc<dyn PathHandler>,
    encryptor: Arc<dyn StreamEncryptor>,
    pool: Option<WorkerPool>,
    pool_size: usize,
    encryption_grace: Duration,
    pipe_capacity: usize,
    certificate: Option<EncryptionCertificate>,
}

impl DocumentClientBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        let defaults = ClientConfig::default();
        Self {
            transport,
            paths: Arc::new(DefaultPathHandler),
            encryptor: Arc::new(EnvelopeEncryptor::new()),
            pool: None,
            pool_size: defaults.worker_pool_size,
            encryption_grace: defaults.encryption_grace,
            pipe_capacity: defaults.pipe_capacity,
            certificate: None,
        }
    }

    /// Take pool size, grace period and pipe capacity from `config`
    pub fn config(mut self, config: &ClientConfig) -> Self {
        self.pool_size = config.worker_pool_size;
        self.encryption_grace = config.encryption_grace;
        self.pipe_capacity = config.pipe_capacity;
        self
    }

    pub fn paths(mut self, paths: Arc<dyn PathHandler>) -> Self {
        self.paths = paths;
        self
    }

    pub fn encryptor(mut self, encryptor: Arc<dyn StreamEncryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Share an existing pool between clients
    pub fn worker_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn encryption_grace(mut self, grace: Duration) -> Self {
        self.encryption_grace = grace;
        self
    }

    pub fn pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    /// Use a known certificate instead of fetching it
    pub fn certificate(mut self, certificate: EncryptionCertificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    pub fn build(self) -> DocumentClient {
        let certificates = match self.certificate {
            Some(certificate) => CertificateCache::with_certificate(certificate),
            None => CertificateCache::new(),
        };
        DocumentClient {
            api: DocumentApi::with_paths(self.transport, self.paths),
            certificates: Arc::new(certificates),
            pool: self.pool.unwrap_or_else(|| WorkerPool::new(self.pool_size)),
            encryptor: self.encryptor,
            encryption_grace: self.encryption_grace,
            pipe_capacity: self.pipe_capacity,
        }
    }
}
