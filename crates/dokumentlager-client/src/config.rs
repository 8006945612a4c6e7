//! Client configuration

use crate::{ClientError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the upload service (upload, update, delete, search, public key)
    pub upload_url: String,
    /// Base URL of the download service
    pub download_url: String,
    /// Total time allowed for one upload request
    pub upload_timeout: Duration,
    /// Total time allowed for one download request
    pub download_timeout: Duration,
    /// Longest silence tolerated on an open connection
    pub idle_timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Number of encryption tasks that may run at once
    pub worker_pool_size: usize,
    /// How long an upload waits for its encryption task after the request returns
    pub encryption_grace: Duration,
    /// Ciphertext buffered between the encryption task and the request body (bytes)
    pub pipe_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            upload_url: "http://localhost:8080".to_string(),
            download_url: "http://localhost:8080".to_string(),
            upload_timeout: Duration::from_secs(60 * 60),
            download_timeout: Duration::from_secs(60 * 60),
            idle_timeout: Duration::from_secs(60),
            user_agent: format!("dokumentlager-client/{}", env!("CARGO_PKG_VERSION")),
            worker_pool_size: 4,
            encryption_grace: Duration::from_secs(10),
            pipe_capacity: 64 * 1024, // 64 KB
        }
    }
}

impl ClientConfig {
    /// Create a new config with the given service URLs
    pub fn new(upload_url: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            download_url: download_url.into(),
            ..Default::default()
        }
    }

    /// Use one base URL for both services
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self::new(base_url.clone(), base_url)
    }

    /// Set the upload and download timeouts
    pub fn with_timeouts(mut self, upload: Duration, download: Duration) -> Self {
        self.upload_timeout = upload;
        self.download_timeout = download;
        self
    }

    /// Set the idle timeout
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    /// Set the encryption worker pool size
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size.max(1);
        self
    }

    /// Set the grace period for encryption task teardown
    pub fn with_encryption_grace(mut self, grace: Duration) -> Self {
        self.encryption_grace = grace;
        self
    }

    /// Set the relay pipe capacity
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Check that both base URLs parse
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("upload", &self.upload_url), ("download", &self.download_url)] {
            let parsed = url::Url::parse(value)
                .map_err(|e| ClientError::Config(format!("invalid {} URL {:?}: {}", name, value, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ClientError::Config(format!(
                    "{} URL must be http or https, got {}",
                    name,
                    parsed.scheme()
                )));
            }
        }
        Ok(())
    }
}

/// A service endpoint as configured by operators
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServiceHost {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_scheme() -> String {
    "https".to_string()
}

impl ServiceHost {
    /// Render as a base URL
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }
}

/// Settings read from the environment (`DOKUMENTLAGER__UPLOAD__HOST=...`)
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub upload: ServiceHost,
    pub download: ServiceHost,
    #[serde(default)]
    pub worker_pool_size: Option<usize>,
    #[serde(default)]
    pub encryption_grace_secs: Option<u64>,
    #[serde(default)]
    pub upload_timeout_secs: Option<u64>,
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl Settings {
    /// Environment prefix for all settings
    pub const ENV_PREFIX: &'static str = "DOKUMENTLAGER";

    /// Load settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_source(Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(Self::ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn from_source(source: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Turn settings into a full client configuration
    pub fn into_config(self) -> ClientConfig {
        let mut config = ClientConfig::new(self.upload.url(), self.download.url());
        if let Some(size) = self.worker_pool_size {
            config = config.with_worker_pool_size(size);
        }
        if let Some(secs) = self.encryption_grace_secs {
            config = config.with_encryption_grace(Duration::from_secs(secs));
        }
        if let Some(secs) = self.upload_timeout_secs {
            config.upload_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.download_timeout_secs {
            config.download_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.idle_timeout = Duration::from_secs(secs);
        }
        config
    }
}
