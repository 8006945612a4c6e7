//! One method per service endpoint
//!
//! [`DocumentApi`] builds each request, sends it through the [`Transport`]
//! and parses the response. It knows nothing about encryption; the
//! orchestration in [`DocumentClient`](crate::DocumentClient) sits on top.

use crate::{
    path::{DefaultPathHandler, PathHandler},
    transport::{
        DocumentReader, DocumentStream, RequestBody, Service, Transport, TransportRequest,
        TransportResponse,
    },
    ClientError, DocumentMetadataUpload, DocumentResponse, DownloadMetadata, MetadataUpdate,
    MetadataUpdateResult, Result, SearchResult, UploadResult,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Low level access to the Dokumentlager endpoints
#[derive(Clone)]
pub struct DocumentApi {
    transport: Arc<dyn Transport>,
    paths: Arc<dyn PathHandler>,
}

impl DocumentApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_paths(transport, Arc::new(DefaultPathHandler))
    }

    pub fn with_paths(transport: Arc<dyn Transport>, paths: Arc<dyn PathHandler>) -> Self {
        Self { transport, paths }
    }

    /// Stream a document and its metadata as one multipart request
    #[instrument(skip_all, fields(%organization_id, %account_id, encrypted))]
    pub async fn upload_document(
        &self,
        content: DocumentStream,
        metadata: &DocumentMetadataUpload,
        organization_id: Uuid,
        account_id: Uuid,
        encrypted: bool,
        request_id: Option<String>,
    ) -> Result<DocumentResponse<UploadResult>> {
        let body = RequestBody::Document {
            metadata: serde_json::to_string(metadata)?,
            file_name: metadata.dokumentnavn.clone(),
            content,
        };
        let request = TransportRequest::new(
            Service::Upload,
            Method::POST,
            self.paths.upload_path(organization_id, account_id),
        )
        .query("kryptert", encrypted)
        .body(body)
        .request_id(request_id);

        let response = self.send("upload", request).await?;
        let response: DocumentResponse<UploadResult> = parse_json(response).await?;
        debug!(document_id = %response.result.id, "Document uploaded");
        Ok(response)
    }

    #[instrument(skip_all, fields(%organization_id, %account_id, %document_id))]
    pub async fn update_metadata(
        &self,
        organization_id: Uuid,
        account_id: Uuid,
        document_id: Uuid,
        update: &MetadataUpdate,
    ) -> Result<DocumentResponse<MetadataUpdateResult>> {
        let request = TransportRequest::new(
            Service::Upload,
            Method::PUT,
            self.paths.document_path(organization_id, account_id, document_id),
        )
        .body(RequestBody::Json(serde_json::to_string(update)?));

        let response = self.send("metadata update", request).await?;
        parse_json(response).await
    }

    #[instrument(skip_all, fields(%organization_id, %account_id, %document_id))]
    pub async fn delete(
        &self,
        organization_id: Uuid,
        account_id: Uuid,
        document_id: Uuid,
    ) -> Result<DocumentResponse<()>> {
        let request = TransportRequest::new(
            Service::Upload,
            Method::DELETE,
            self.paths.document_path(organization_id, account_id, document_id),
        );
        let response = self.send("delete", request).await?;
        Ok(DocumentResponse::new((), response.status, response.headers))
    }

    #[instrument(skip_all, fields(%organization_id, %account_id, %correlation_id))]
    pub async fn delete_by_correlation_id(
        &self,
        organization_id: Uuid,
        account_id: Uuid,
        correlation_id: Uuid,
    ) -> Result<DocumentResponse<()>> {
        let request = TransportRequest::new(
            Service::Upload,
            Method::DELETE,
            self.paths.correlation_path(organization_id, account_id, correlation_id),
        );
        let response = self.send("delete by correlation id", request).await?;
        Ok(DocumentResponse::new((), response.status, response.headers))
    }

    /// Open a document for streaming. The body is not read here.
    #[instrument(skip_all, fields(%document_id))]
    pub async fn download(&self, document_id: Uuid) -> Result<DocumentResponse<DocumentReader>> {
        let request = TransportRequest::new(
            Service::Download,
            Method::GET,
            self.paths.download_path(document_id),
        );
        let response = self.send("download", request).await?;
        Ok(DocumentResponse::new(
            response.body.into_reader(),
            response.status,
            response.headers,
        ))
    }

    #[instrument(skip_all, fields(%document_id))]
    pub async fn download_metadata(&self, document_id: Uuid) -> Result<DocumentResponse<DownloadMetadata>> {
        let request = TransportRequest::new(
            Service::Download,
            Method::GET,
            self.paths.download_metadata_path(document_id),
        );
        let response = self.send("download metadata", request).await?;
        parse_json(response).await
    }

    /// Page through documents sharing `correlation_id`, hits `from` to `to`
    #[instrument(skip_all, fields(%organization_id, %account_id, %correlation_id))]
    pub async fn search_by_correlation_id(
        &self,
        organization_id: Uuid,
        account_id: Uuid,
        correlation_id: Uuid,
        from: u32,
        to: u32,
    ) -> Result<DocumentResponse<SearchResult>> {
        let body = serde_json::json!({ "korrelasjonsid": correlation_id });
        let request = TransportRequest::new(
            Service::Upload,
            Method::POST,
            self.paths.search_path(organization_id, account_id),
        )
        .query("fra", from)
        .query("til", to)
        .body(RequestBody::Json(body.to_string()));

        let response = self.send("document query", request).await?;
        parse_json(response).await
    }

    /// Fetch the service's encryption certificate as PEM text
    #[instrument(skip(self))]
    pub async fn public_key(&self) -> Result<DocumentResponse<String>> {
        let request = TransportRequest::new(Service::Upload, Method::GET, self.paths.public_key_path());
        let response = self.send("public key", request).await?;
        let (status, headers) = (response.status, response.headers);
        let pem = response.body.text().await?;
        Ok(DocumentResponse::new(pem, status, headers))
    }

    async fn send(&self, operation: &'static str, request: TransportRequest) -> Result<TransportResponse> {
        let response = self.transport.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }

        let status = response.status;
        let body = match response.body.text().await {
            Ok(body) => body,
            Err(err) => {
                debug!(operation, status, error = %err, "Could not read error body");
                String::new()
            }
        };
        tracing::error!(operation, status, "Service returned an error");
        Err(ClientError::Http {
            operation,
            status,
            body,
        })
    }
}

impl std::fmt::Debug for DocumentApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentApi").finish_non_exhaustive()
    }
}

async fn parse_json<T: DeserializeOwned>(response: TransportResponse) -> Result<DocumentResponse<T>> {
    let (status, headers) = (response.status, response.headers);
    let bytes = response.body.bytes().await?;
    if bytes.is_empty() {
        return Err(ClientError::InvalidResponse(format!("empty body with status {}", status)));
    }
    let result = serde_json::from_slice(&bytes)?;
    Ok(DocumentResponse::new(result, status, headers))
}
