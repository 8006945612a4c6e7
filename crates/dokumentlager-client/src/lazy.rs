//! Downloads that may defer their request until first use
//!
//! A [`LazyDownload`] holds the call instead of its result. Nothing is sent
//! until the status, a header or the body is first asked for, and the call
//! then runs exactly once. When it fails, the trigger gets the original
//! error and every later access gets [`ClientError::DownloadFailed`].

use crate::{transport::DocumentReader, ClientError, DocumentResponse, Result};
use futures::future::BoxFuture;
use std::{
    future::{poll_fn, Future},
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};
use tokio::io::{AsyncRead, ReadBuf};

type DownloadFuture = BoxFuture<'static, Result<DocumentResponse<DocumentReader>>>;
type DeferredCall = Box<dyn FnOnce() -> DownloadFuture + Send>;

enum State {
    Deferred(DeferredCall),
    Running(DownloadFuture),
    Ready(DocumentResponse<DocumentReader>),
    Failed(String),
    Consumed,
}

/// A download whose request runs on first access
pub struct LazyDownload {
    state: State,
}

impl LazyDownload {
    pub fn new<F, Fut>(call: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<DocumentResponse<DocumentReader>>> + Send + 'static,
    {
        Self {
            state: State::Deferred(Box::new(move || Box::pin(call()))),
        }
    }

    /// Whether the request has been issued
    pub fn is_started(&self) -> bool {
        !matches!(self.state, State::Deferred(_))
    }

    pub async fn status(&mut self) -> Result<u16> {
        Ok(self.response().await?.status)
    }

    pub async fn header(&mut self, name: &str) -> Result<Option<String>> {
        Ok(self.response().await?.header(name).map(str::to_string))
    }

    /// Run the call if needed and hand over the whole response
    pub async fn resolve(mut self) -> Result<DocumentResponse<DocumentReader>> {
        self.response().await?;
        match std::mem::replace(&mut self.state, State::Consumed) {
            State::Ready(response) => Ok(response),
            _ => Err(consumed()),
        }
    }

    async fn response(&mut self) -> Result<&mut DocumentResponse<DocumentReader>> {
        poll_fn(|cx| self.poll_ready(cx)).await?;
        match &mut self.state {
            State::Ready(response) => Ok(response),
            _ => Err(consumed()),
        }
    }

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        loop {
            match &mut self.state {
                State::Deferred(_) => {
                    if let State::Deferred(call) = std::mem::replace(&mut self.state, State::Consumed) {
                        tracing::debug!("Starting deferred download");
                        self.state = State::Running(call());
                    }
                }
                State::Running(future) => match ready!(future.as_mut().poll(cx)) {
                    Ok(response) => self.state = State::Ready(response),
                    Err(err) => {
                        self.state = State::Failed(err.to_string());
                        return Poll::Ready(Err(err));
                    }
                },
                State::Ready(_) => return Poll::Ready(Ok(())),
                State::Failed(message) => {
                    return Poll::Ready(Err(ClientError::DownloadFailed(message.clone())))
                }
                State::Consumed => return Poll::Ready(Err(consumed())),
            }
        }
    }
}

fn consumed() -> ClientError {
    ClientError::DownloadFailed("download was already consumed".to_string())
}

fn into_io(err: ClientError) -> io::Error {
    match err {
        ClientError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

impl AsyncRead for LazyDownload {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_ready(cx)).map_err(into_io)?;
        match &mut this.state {
            State::Ready(response) => Pin::new(&mut response.result).poll_read(cx, buf),
            _ => Poll::Ready(Err(into_io(consumed()))),
        }
    }
}

impl std::fmt::Debug for LazyDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Deferred(_) => "deferred",
            State::Running(_) => "running",
            State::Ready(_) => "ready",
            State::Failed(_) => "failed",
            State::Consumed => "consumed",
        };
        f.debug_struct("LazyDownload").field("state", &state).finish()
    }
}

/// A download that either already has its response or will fetch it on first use
#[derive(Debug)]
pub enum Download {
    Eager(DocumentResponse<DocumentReader>),
    Lazy(LazyDownload),
}

impl Download {
    pub fn is_lazy(&self) -> bool {
        matches!(self, Self::Lazy(_))
    }

    pub async fn status(&mut self) -> Result<u16> {
        match self {
            Self::Eager(response) => Ok(response.status),
            Self::Lazy(lazy) => lazy.status().await,
        }
    }

    pub async fn header(&mut self, name: &str) -> Result<Option<String>> {
        match self {
            Self::Eager(response) => Ok(response.header(name).map(str::to_string)),
            Self::Lazy(lazy) => lazy.header(name).await,
        }
    }

    pub async fn resolve(self) -> Result<DocumentResponse<DocumentReader>> {
        match self {
            Self::Eager(response) => Ok(response),
            Self::Lazy(lazy) => lazy.resolve().await,
        }
    }
}

impl AsyncRead for Download {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Eager(response) => Pin::new(&mut response.result).poll_read(cx, buf),
            Self::Lazy(lazy) => Pin::new(lazy).poll_read(cx, buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ResponseBody;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };
    use tokio::io::AsyncReadExt;

    fn counting(calls: &Arc<AtomicUsize>, outcome: std::result::Result<&'static str, u16>) -> LazyDownload {
        let calls = calls.clone();
        LazyDownload::new(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            match outcome {
                Ok(body) => Ok(DocumentResponse::new(
                    ResponseBody::from_bytes(body).into_reader(),
                    200,
                    HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
                )),
                Err(status) => Err(ClientError::Http {
                    operation: "download",
                    status,
                    body: "borte".to_string(),
                }),
            }
        })
    }

    #[tokio::test]
    async fn test_nothing_happens_until_first_access() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut lazy = counting(&calls, Ok("innhold"));
        tokio::task::yield_now().await;
        assert!(!lazy.is_started());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(lazy.status().await.unwrap(), 200);
        assert_eq!(lazy.header("Content-Type").await.unwrap().as_deref(), Some("text/plain"));
        let mut body = String::new();
        lazy.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "innhold");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_triggers_the_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut download = Download::Lazy(counting(&calls, Ok("abc")));
        let mut body = Vec::new();
        download.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"abc");
        assert_eq!(download.status().await.unwrap(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_error_then_download_failed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut lazy = counting(&calls, Err(404));

        let first = lazy.status().await.unwrap_err();
        assert!(first.is_not_found());

        let second = lazy.header("etag").await.unwrap_err();
        match second {
            ClientError::DownloadFailed(message) => assert!(message.contains("404")),
            other => panic!("unexpected error: {other}"),
        }
        let mut buf = [0u8; 8];
        assert!(lazy.read(&mut buf).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eager_download_answers_directly() {
        let response = DocumentResponse::new(ResponseBody::from_bytes("x").into_reader(), 206, HashMap::new());
        let mut download = Download::Eager(response);
        assert!(!download.is_lazy());
        assert_eq!(download.status().await.unwrap(), 206);
        assert_eq!(download.resolve().await.unwrap().status, 206);
    }
}
