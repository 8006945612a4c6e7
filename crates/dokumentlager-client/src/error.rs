//! Client error types

use std::time::Duration;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Boxed error used for collaborator failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// The document stream yielded no bytes
    #[error("document is empty")]
    EmptyDocument,

    /// The document exceeded the caller's size limit
    #[error("document exceeds the maximum size of {limit} bytes")]
    DocumentTooLarge { limit: u64 },

    /// Encrypting the document failed
    #[error("encryption error: {0}")]
    Encryption(String),

    /// The service's encryption certificate could not be fetched or decoded
    #[error("could not resolve encryption certificate: {0}")]
    CertificateResolution(#[source] BoxError),

    /// Network level failure: connect, timeout, broken body
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// The service answered with a 4xx or 5xx status
    #[error("HTTP error during {operation} ({status}): {body}")]
    Http {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// A background encryption task did not stop within its grace period
    #[error("encryption task did not finish within {0:?}")]
    TaskTimeout(Duration),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A deferred download already failed once
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// Invalid response
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

impl ClientError {
    /// HTTP status of an application level error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Check if the service rejected the request itself
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }
}
