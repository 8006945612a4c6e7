//! HTTP transport
//!
//! [`Transport`] is the seam between the client and the network. A transport
//! returns every response it receives, whatever the status; only failures
//! to talk to the service at all are errors here.

use crate::{
    auth::AuthenticationStrategy, ClientConfig, ClientError, Result,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::{
    multipart::{Form, Part},
    Body, Client, Method,
};
use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

/// Header carrying the caller's request id to the service
pub const REQUEST_ID_HEADER: &str = "requestid";

/// Name of the multipart field holding metadata JSON
pub const METADATA_PART: &str = "metadata";

/// Name of the multipart field holding the document bytes
pub const DOCUMENT_PART: &str = "dokument";

/// A stream of body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Which of the two service hosts a request goes to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Service {
    Upload,
    Download,
}

/// Document bytes streamed into a multipart request
pub struct DocumentStream(ByteStream);

impl DocumentStream {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self(Box::pin(stream))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::from_stream(ReaderStream::new(reader))
    }

    pub fn into_inner(self) -> ByteStream {
        self.0
    }
}

impl std::fmt::Debug for DocumentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DocumentStream")
    }
}

/// Request body variants
#[derive(Debug)]
pub enum RequestBody {
    Empty,
    Json(String),
    /// Multipart form with a JSON metadata field and a streamed file field
    Document {
        metadata: String,
        file_name: String,
        content: DocumentStream,
    },
}

/// A request as the API layer describes it
#[derive(Debug)]
pub struct TransportRequest {
    pub service: Service,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub request_id: Option<String>,
}

impl TransportRequest {
    pub fn new(service: Service, method: Method, path: impl Into<String>) -> Self {
        Self {
            service,
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            request_id: None,
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// A response body, read at most once
pub struct ResponseBody(ByteStream);

impl ResponseBody {
    pub fn empty() -> Self {
        Self::from_stream(futures::stream::empty())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::from_stream(futures::stream::once(async move { Ok(bytes) }))
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self(Box::pin(stream))
    }

    /// Collect the whole body
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.0.next().await {
            buf.extend_from_slice(&chunk.map_err(|e| ClientError::Transport(Box::new(e)))?);
        }
        Ok(buf.freeze())
    }

    /// Collect the body as UTF-8 text, replacing invalid sequences
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn into_reader(self) -> DocumentReader {
        DocumentReader {
            inner: StreamReader::new(self.0),
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResponseBody")
    }
}

/// Streaming reader over a downloaded document
pub struct DocumentReader {
    inner: StreamReader<ByteStream, Bytes>,
}

impl AsyncRead for DocumentReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl std::fmt::Debug for DocumentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DocumentReader")
    }
}

/// A raw response
#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to the service
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// [`Transport`] backed by reqwest
pub struct HttpTransport {
    http: Client,
    upload_url: String,
    download_url: String,
    upload_timeout: Duration,
    download_timeout: Duration,
    auth: Arc<dyn AuthenticationStrategy>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig, auth: Arc<dyn AuthenticationStrategy>) -> Result<Self> {
        config.validate()?;

        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .read_timeout(config.idle_timeout)
            .build()?;

        Ok(Self {
            http,
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
            download_url: config.download_url.trim_end_matches('/').to_string(),
            upload_timeout: config.upload_timeout,
            download_timeout: config.download_timeout,
            auth,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let (base, timeout) = match request.service {
            Service::Upload => (&self.upload_url, self.upload_timeout),
            Service::Download => (&self.download_url, self.download_timeout),
        };
        let url = format!("{}{}", base, request.path);

        let mut builder = self.http.request(request.method.clone(), &url).timeout(timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in self.auth.headers().await? {
            builder = builder.header(name, value);
        }
        if let Some(request_id) = &request.request_id {
            builder = builder.header(REQUEST_ID_HEADER, request_id);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(json) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(json),
            RequestBody::Document {
                metadata,
                file_name,
                content,
            } => {
                let metadata = Part::text(metadata).mime_str("application/json")?;
                let document = Part::stream(Body::wrap_stream(content.into_inner()))
                    .file_name(file_name)
                    .mime_str("application/octet-stream")?;
                builder.multipart(
                    Form::new()
                        .part(METADATA_PART, metadata)
                        .part(DOCUMENT_PART, document),
                )
            }
        };

        debug!(method = %request.method, %url, "Sending request");
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = ResponseBody::from_stream(
            response
                .bytes_stream()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        );
        debug!(status, "Received response");

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
