//! Shared helpers for the client integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use dokumentlager_client::{
    transport::{RequestBody, ResponseBody, Transport, TransportRequest, TransportResponse},
    ClientError, DecryptionKey, EncryptionCertificate, EnvelopeDecryptor, Result,
};
use futures::StreamExt;
use parking_lot::Mutex;
use rand::Rng;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};
use uuid::Uuid;

pub const CERTIFICATE_PEM: &str = include_str!("../../../dokumentlager-crypto/tests/fixtures/test-certificate.pem");
pub const PRIVATE_KEY_PEM: &str = include_str!("../../../dokumentlager-crypto/tests/fixtures/test-private-key.pem");

pub fn certificate() -> EncryptionCertificate {
    EncryptionCertificate::from_pem(CERTIFICATE_PEM).unwrap()
}

pub fn decryptor() -> EnvelopeDecryptor {
    EnvelopeDecryptor::new(DecryptionKey::from_pem(PRIVATE_KEY_PEM).unwrap())
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill(&mut data[..]);
    data
}

pub fn upload_result_json(id: Uuid, size: usize) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "dokumentnavn": "dokument.bin",
        "mimeType": "application/octet-stream",
        "ukryptertStorrelse": size,
    })
}

/// Split a `multipart/form-data` body into `(field name, content)` pairs
pub fn multipart_parts(content_type: &str, body: &[u8]) -> Vec<(String, Vec<u8>)> {
    let boundary = content_type
        .split("boundary=")
        .nth(1)
        .expect("no boundary in content type")
        .trim_matches('"');
    let delimiter = format!("--{}", boundary).into_bytes();

    let positions: Vec<usize> = body
        .windows(delimiter.len())
        .enumerate()
        .filter(|(_, window)| *window == delimiter.as_slice())
        .map(|(i, _)| i)
        .collect();

    positions
        .windows(2)
        .map(|pair| {
            let part = &body[pair[0] + delimiter.len()..pair[1]];
            let part = part.strip_prefix(b"\r\n").unwrap_or(part);
            let split = part
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .expect("part without header terminator");
            let headers = String::from_utf8_lossy(&part[..split]).to_string();
            let content = part[split + 4..].strip_suffix(b"\r\n").unwrap_or(&part[split + 4..]);
            let name = headers
                .split("name=\"")
                .nth(1)
                .and_then(|rest| rest.split('"').next())
                .unwrap_or_default()
                .to_string();
            (name, content.to_vec())
        })
        .collect()
}

pub fn part<'a>(parts: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
    parts
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, content)| content.as_slice())
        .unwrap_or_else(|| panic!("no multipart field named {name}"))
}

/// A source that yields `good` bytes and then fails, like a vanished disk
pub struct FailingSource {
    good: usize,
}

impl FailingSource {
    pub fn after(good: usize) -> Self {
        Self { good }
    }
}

impl tokio::io::AsyncRead for FailingSource {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.good == 0 {
            return std::task::Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")));
        }
        let n = self.good.min(buf.remaining()).min(4096);
        buf.put_slice(&vec![5u8; n]);
        self.good -= n;
        std::task::Poll::Ready(Ok(()))
    }
}

/// One document as the recording transport received it
#[derive(Clone, Debug)]
pub struct RecordedUpload {
    pub name: String,
    pub encrypted: bool,
    pub request_id: Option<String>,
    pub body: Vec<u8>,
}

/// In-memory service. Drains every document body, records it and answers
/// with an upload result. The next `fail_next` uploads fail after their
/// first chunk, as a dropped connection would.
#[derive(Default)]
pub struct RecordingTransport {
    pub uploads: Mutex<Vec<RecordedUpload>>,
    pub certificate_fetches: AtomicUsize,
    fail_next: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(count: usize) -> Self {
        let transport = Self::default();
        transport.fail_next.store(count, Ordering::SeqCst);
        transport
    }

    pub fn upload_named(&self, name: &str) -> Option<RecordedUpload> {
        self.uploads.lock().iter().find(|u| u.name == name).cloned()
    }

    fn take_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn ok(status: u16, body: impl Into<Bytes>) -> Result<TransportResponse> {
        Ok(TransportResponse {
            status,
            headers: HashMap::new(),
            body: ResponseBody::from_bytes(body),
        })
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        if request.path.ends_with("/public-key") {
            self.certificate_fetches.fetch_add(1, Ordering::SeqCst);
            return Self::ok(200, CERTIFICATE_PEM);
        }

        let encrypted = request
            .query
            .iter()
            .any(|(name, value)| name == "kryptert" && value == "true");
        let RequestBody::Document {
            metadata, content, ..
        } = request.body
        else {
            return Self::ok(204, Bytes::new());
        };

        let mut stream = content.into_inner();
        if self.take_failure() {
            let _ = stream.next().await;
            drop(stream);
            return Err(ClientError::Transport("connection reset by peer".into()));
        }

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::Transport(Box::new(e)))?;
            body.extend_from_slice(&chunk);
        }

        let metadata: serde_json::Value = serde_json::from_str(&metadata)?;
        let name = metadata["dokumentnavn"].as_str().unwrap_or_default().to_string();
        let size = body.len();
        self.uploads.lock().push(RecordedUpload {
            name,
            encrypted,
            request_id: request.request_id,
            body,
        });

        Self::ok(200, upload_result_json(Uuid::new_v4(), size).to_string())
    }
}
