//! # Dokumentlager Client SDK
//!
//! A client for the Fiks Dokumentlager document storage service.
//!
//! ## Features
//!
//! - **Streaming uploads**: documents go to the service as they are read, never buffered whole
//! - **Client-side encryption**: documents above security level 3 are encrypted to the
//!   service certificate on a bounded worker pool while they upload
//! - **Size limits**: empty and oversized documents are rejected, small ones before any request
//! - **Lazy downloads**: a download can wait for its first read before contacting the service
//!
//! ## Example
//!
//! ```rust,ignore
//! use dokumentlager_client::{
//!     BearerToken, ClientConfig, DocumentClient, DocumentMetadataUpload, UploadRequest,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = DocumentClient::new(
//!         ClientConfig::with_base_url("https://api.fiks.ks.no"),
//!         Arc::new(BearerToken::new("token")),
//!     )?;
//!
//!     let file = tokio::fs::File::open("vedtak.pdf").await?;
//!     let metadata = DocumentMetadataUpload::new("vedtak.pdf").with_security_level(4);
//!     let uploaded = client
//!         .upload(UploadRequest::new(file, metadata, org_id, account_id).max_size(50 << 20))
//!         .await?;
//!     println!("Stored as {}", uploaded.result.id);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod certificate;
mod client;
mod config;
pub mod encryption;
mod error;
pub mod input;
pub mod lazy;
pub mod path;
pub mod pipe;
mod response;
pub mod transport;
mod types;
pub mod worker;

pub use api::DocumentApi;
pub use auth::{AccessTokenProvider, AuthenticationStrategy, BearerToken, IntegrationAuthentication, NoAuthentication};
pub use certificate::CertificateCache;
pub use client::{DocumentClient, DocumentClientBuilder, UploadRequest};
pub use config::{ClientConfig, ServiceHost, Settings};
pub use error::{BoxError, ClientError, Result};
pub use lazy::{Download, LazyDownload};
pub use path::{DefaultPathHandler, PathHandler};
pub use response::DocumentResponse;
pub use transport::{DocumentReader, HttpTransport, Transport};
pub use types::*;
pub use worker::WorkerPool;

// Re-export the crypto types callers need for encryption and decryption
pub use dokumentlager_crypto::{DecryptionKey, EncryptionCertificate, EnvelopeDecryptor, StreamEncryptor};
