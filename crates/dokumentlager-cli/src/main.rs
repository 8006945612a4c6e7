//! Dokumentlager command line client

use anyhow::Context;
use clap::{Parser, Subcommand};
use dokumentlager_client::{
    AuthenticationStrategy, BearerToken, ClientConfig, DecryptionKey, DocumentClient,
    DocumentMetadataUpload, EncryptionCertificate, EnvelopeDecryptor, IntegrationAuthentication, MetadataUpdate,
    NoAuthentication, Settings, UploadRequest,
};
use std::{path::PathBuf, sync::Arc};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "dokumentlager")]
#[command(about = "Upload, download and manage documents in Dokumentlager")]
#[command(version)]
struct Args {
    /// Base URL used for both services
    #[arg(long, env = "DOKUMENTLAGER_URL", conflicts_with_all = ["upload_url", "download_url"])]
    base_url: Option<String>,

    /// Base URL of the upload service
    #[arg(long, env = "DOKUMENTLAGER_UPLOAD_URL", requires = "download_url")]
    upload_url: Option<String>,

    /// Base URL of the download service
    #[arg(long, env = "DOKUMENTLAGER_DOWNLOAD_URL", requires = "upload_url")]
    download_url: Option<String>,

    /// Bearer access token
    #[arg(long, env = "DOKUMENTLAGER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Fiks integration id, sent along with the token
    #[arg(long, env = "DOKUMENTLAGER_INTEGRATION_ID", requires_all = ["token", "integration_password"])]
    integration_id: Option<Uuid>,

    /// Fiks integration password
    #[arg(long, env = "DOKUMENTLAGER_INTEGRATION_PASSWORD", hide_env_values = true)]
    integration_password: Option<String>,

    /// Number of concurrent encryption tasks
    #[arg(long, env = "DOKUMENTLAGER_WORKERS")]
    workers: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, env = "DOKUMENTLAGER_DEBUG")]
    debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file, encrypting it when required
    Upload {
        file: PathBuf,
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        account: Uuid,
        /// Force encryption on or off instead of deciding from the security level
        #[arg(long)]
        encrypt: Option<bool>,
        #[arg(long)]
        security_level: Option<i32>,
        /// Reject documents larger than this many bytes
        #[arg(long)]
        max_size: Option<u64>,
        /// Time to live in seconds
        #[arg(long)]
        ttl: Option<i64>,
        #[arg(long)]
        correlation_id: Option<Uuid>,
        /// Defaults to a guess from the file extension
        #[arg(long)]
        mime_type: Option<String>,
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Upload a file that is already an encrypted envelope
    UploadEncrypted {
        file: PathBuf,
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        account: Uuid,
        /// Name stored with the document, defaults to the file name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        mime_type: Option<String>,
    },
    /// Download a document to a file or stdout
    Download {
        id: Uuid,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Defer the request until the first read
        #[arg(long)]
        lazy: bool,
        /// Private key (PEM) used to decrypt an encrypted document
        #[arg(long)]
        decrypt_with: Option<PathBuf>,
    },
    /// Show the download metadata of a document
    Metadata { id: Uuid },
    /// Change the time to live of a stored document
    SetTtl {
        id: Uuid,
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        account: Uuid,
        ttl: i64,
    },
    /// Delete one document
    Delete {
        id: Uuid,
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        account: Uuid,
    },
    /// Delete every document with a correlation id
    DeleteByCorrelation {
        correlation_id: Uuid,
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        account: Uuid,
    },
    /// List documents with a correlation id
    Search {
        correlation_id: Uuid,
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        account: Uuid,
        #[arg(long, default_value_t = 0)]
        from: u32,
        #[arg(long, default_value_t = 100)]
        to: u32,
    },
    /// Print the service encryption certificate
    PublicKey,
}

impl Args {
    fn config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match (&self.base_url, &self.upload_url, &self.download_url) {
            (Some(base), _, _) => ClientConfig::with_base_url(base),
            (None, Some(upload), Some(download)) => ClientConfig::new(upload, download),
            _ => Settings::from_env()
                .context("no service URL given and none configured in the environment")?
                .into_config(),
        };
        if let Some(workers) = self.workers {
            config = config.with_worker_pool_size(workers);
        }
        Ok(config)
    }

    fn authentication(&self) -> Arc<dyn AuthenticationStrategy> {
        match (&self.token, self.integration_id, &self.integration_password) {
            (Some(token), Some(id), Some(password)) => Arc::new(IntegrationAuthentication::new(
                Arc::new(BearerToken::new(token)),
                id,
                password,
            )),
            (Some(token), _, _) => Arc::new(BearerToken::new(token)),
            _ => Arc::new(NoAuthentication),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logs go to stderr so downloads can be piped from stdout
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("dokumentlager={0},dokumentlager_client={0}", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let config = args.config()?;
    tracing::debug!("Upload service: {}", config.upload_url);
    tracing::debug!("Download service: {}", config.download_url);
    let client = DocumentClient::new(config, args.authentication())?;

    match args.command {
        Command::Upload {
            file,
            org,
            account,
            encrypt,
            security_level,
            max_size,
            ttl,
            correlation_id,
            mime_type,
            request_id,
        } => {
            let mut metadata = DocumentMetadataUpload::new(file_name(&file)?)
                .with_mimetype(mime_type.unwrap_or_else(|| guess_mime_type(&file)));
            if let Some(level) = security_level {
                metadata = metadata.with_security_level(level);
            }
            if let Some(ttl) = ttl {
                metadata = metadata.with_ttl(ttl);
            }
            if let Some(id) = correlation_id {
                metadata = metadata.with_correlation_id(id);
            }

            let (content, size) = open(&file).await?;
            let mut request = UploadRequest::new(content, metadata, org, account).size_hint(size);
            if let Some(encrypt) = encrypt {
                request = request.encrypt(encrypt);
            }
            if let Some(limit) = max_size {
                request = request.max_size(limit);
            }
            if let Some(id) = request_id {
                request = request.request_id(id);
            }

            let encrypted = request.should_encrypt();
            let response = client.upload(request).await?;
            tracing::info!(id = %response.result.id, encrypted, "Uploaded {}", file.display());
            print_json(&response.result)?;
        }
        Command::UploadEncrypted {
            file,
            org,
            account,
            name,
            mime_type,
        } => {
            let name = match name {
                Some(name) => name,
                None => file_name(&file)?,
            };
            let metadata = DocumentMetadataUpload::new(name)
                .with_mimetype(mime_type.unwrap_or_else(|| guess_mime_type(&file)));
            let (content, size) = open(&file).await?;
            let request = UploadRequest::new(content, metadata, org, account).size_hint(size);
            let response = client.upload_already_encrypted(request).await?;
            print_json(&response.result)?;
        }
        Command::Download {
            id,
            output,
            lazy,
            decrypt_with,
        } => {
            let decryptor = match decrypt_with {
                Some(path) => {
                    let pem = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    Some(EnvelopeDecryptor::new(DecryptionKey::from_pem(&pem)?))
                }
                None => None,
            };

            let mut sink: Box<dyn AsyncWrite + Send + Unpin> = match &output {
                Some(path) => Box::new(
                    tokio::fs::File::create(path)
                        .await
                        .with_context(|| format!("creating {}", path.display()))?,
                ),
                None => Box::new(tokio::io::stdout()),
            };

            let written = if lazy {
                let mut download = client.download_lazy(id);
                copy_document(&mut download, &mut sink, decryptor.as_ref()).await?
            } else {
                let mut response = client.download(id).await?;
                copy_document(&mut response.result, &mut sink, decryptor.as_ref()).await?
            };
            sink.shutdown().await?;
            tracing::info!(%id, bytes = written, "Downloaded document");
        }
        Command::Metadata { id } => {
            print_json(&client.download_metadata(id).await?.result)?;
        }
        Command::SetTtl {
            id,
            org,
            account,
            ttl,
        } => {
            let update = MetadataUpdate {
                ttl: Some(ttl),
                ..Default::default()
            };
            print_json(&client.update_metadata(org, account, id, &update).await?.result)?;
        }
        Command::Delete { id, org, account } => {
            let response = client.delete(org, account, id).await?;
            tracing::info!(%id, status = response.status, "Deleted document");
        }
        Command::DeleteByCorrelation {
            correlation_id,
            org,
            account,
        } => {
            let response = client.delete_by_correlation_id(org, account, correlation_id).await?;
            tracing::info!(%correlation_id, status = response.status, "Deleted documents");
        }
        Command::Search {
            correlation_id,
            org,
            account,
            from,
            to,
        } => {
            let response = client
                .search_by_correlation_id(org, account, correlation_id, from, to)
                .await?;
            print_json(&response.result)?;
        }
        Command::PublicKey => {
            let (pem, certificate) = fetch_certificate(&client).await?;
            tracing::info!(
                subject = certificate.subject(),
                fingerprint = certificate.fingerprint(),
                "Service certificate"
            );
            println!("{}", pem.trim_end());
        }
    }

    Ok(())
}

/// Fetch the service certificate once, returning the PEM text and its decoded form
async fn fetch_certificate(client: &DocumentClient) -> anyhow::Result<(String, EncryptionCertificate)> {
    let pem = client.public_key().await?.result;
    let certificate = EncryptionCertificate::from_pem(&pem).context("decoding the service certificate")?;
    Ok((pem, certificate))
}

async fn open(path: &PathBuf) -> anyhow::Result<(tokio::fs::File, u64)> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}

fn file_name(path: &PathBuf) -> anyhow::Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

fn guess_mime_type(path: &PathBuf) -> String {
    mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string()
}

async fn copy_document<R, W>(
    reader: &mut R,
    writer: &mut W,
    decryptor: Option<&EnvelopeDecryptor>,
) -> anyhow::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let written = match decryptor {
        Some(decryptor) => decryptor.decrypt_stream(reader, writer).await?,
        None => tokio::io::copy(reader, writer).await?,
    };
    writer.flush().await?;
    Ok(written)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
