//! Empty-input detection and size limiting for caller supplied documents

use crate::{ClientError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{ready, Context, Poll},
};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// A boxed document source
pub type DocumentSource = Box<dyn AsyncRead + Send + Unpin>;

/// Limits up to this size are checked by reading ahead before anything is sent
pub const READ_AHEAD_LIMIT: u64 = 64 * 1024;

/// Inner error of the `io::Error` raised when a guarded stream passes its limit
#[derive(Debug, thiserror::Error)]
#[error("Exceeded configured input limit of {limit} bytes")]
pub struct InputLimitExceeded {
    pub limit: u64,
}

/// What went wrong with a guarded stream: a passed limit or a failed read of
/// the caller's source. Survives the stream itself, so the outcome is known
/// whichever layer reported the failure.
#[derive(Clone, Debug, Default)]
pub struct InputMonitor {
    tripped: Arc<AtomicBool>,
    read_failure: Arc<Mutex<Option<(io::ErrorKind, String)>>>,
}

impl InputMonitor {
    /// Whether the limit was passed
    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// The first error the caller's source returned, if any
    pub fn read_failure(&self) -> Option<io::Error> {
        self.read_failure
            .lock()
            .as_ref()
            .map(|(kind, message)| io::Error::new(*kind, message.clone()))
    }

    fn trip(&self) {
        self.tripped.store(true, Ordering::Release);
    }

    fn record_failure(&self, err: &io::Error) {
        let mut slot = self.read_failure.lock();
        if slot.is_none() {
            *slot = Some((err.kind(), err.to_string()));
        }
    }
}

/// A document source known to be non-empty, optionally capped in size
pub struct BoundedInput {
    inner: DocumentSource,
    ahead: Bytes,
    read: u64,
    limit: Option<u64>,
    monitor: InputMonitor,
}

impl BoundedInput {
    /// Read ahead from `inner`, failing with [`ClientError::EmptyDocument`]
    /// if it yields nothing. A `max_size` of 0 disables the limit.
    ///
    /// Normally one byte is read ahead. With a limit of at most
    /// [`READ_AHEAD_LIMIT`] up to `max_size + 1` bytes are, so a small
    /// oversized document fails here with [`ClientError::DocumentTooLarge`].
    /// Larger limits are enforced while streaming.
    pub async fn guard(mut inner: DocumentSource, max_size: u64) -> Result<Self> {
        let limit = (max_size > 0).then_some(max_size);
        let want = match limit {
            Some(limit) if limit <= READ_AHEAD_LIMIT => limit + 1,
            _ => 1,
        };

        let mut ahead = Vec::with_capacity(want as usize);
        (&mut inner)
            .take(want)
            .read_to_end(&mut ahead)
            .await
            .map_err(ClientError::Io)?;

        if ahead.is_empty() {
            return Err(ClientError::EmptyDocument);
        }
        let monitor = InputMonitor::default();
        if let Some(limit) = limit {
            if ahead.len() as u64 > limit {
                monitor.trip();
                tracing::debug!(limit, "Document is larger than its size limit");
                return Err(ClientError::DocumentTooLarge { limit });
            }
        }

        Ok(Self {
            inner,
            ahead: Bytes::from(ahead),
            read: 0,
            limit,
            monitor,
        })
    }

    pub fn monitor(&self) -> InputMonitor {
        self.monitor.clone()
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    fn limit_error(limit: u64) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, InputLimitExceeded { limit })
    }
}

impl AsyncRead for BoundedInput {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let (Some(limit), true) = (this.limit, this.monitor.tripped()) {
            return Poll::Ready(Err(Self::limit_error(limit)));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        if this.ahead.is_empty() {
            if let Err(err) = ready!(Pin::new(&mut this.inner).poll_read(cx, buf)) {
                this.monitor.record_failure(&err);
                return Poll::Ready(Err(err));
            }
        } else {
            let n = this.ahead.len().min(buf.remaining());
            buf.put_slice(&this.ahead.split_to(n));
        }
        this.read += (buf.filled().len() - before) as u64;

        if let Some(limit) = this.limit {
            if this.read > limit {
                // A failed read must leave the buffer as it found it.
                buf.set_filled(before);
                this.monitor.trip();
                tracing::debug!(limit, "Document passed its size limit");
                return Poll::Ready(Err(Self::limit_error(limit)));
            }
        }
        Poll::Ready(Ok(()))
    }
}
