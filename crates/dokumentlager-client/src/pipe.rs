//! Bounded relay pipe between the encryption task and the request body
//!
//! The writer half is an [`AsyncWrite`] owned by the encryption task, the
//! reader half a [`Stream`] of chunks handed to the HTTP client. Capacity is
//! fixed, so a slow upload holds back encryption instead of letting
//! ciphertext pile up in memory.
//!
//! The pipe carries one sticky error. Once set it is returned by every read,
//! even while unread bytes remain, so a failed encryption can never look
//! like a short but complete document.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use parking_lot::Mutex;
use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};
use thiserror::Error;
use tokio::io::AsyncWrite;

/// Terminal failure injected by the producer
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipeError {
    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("document exceeds the maximum size of {0} bytes")]
    LimitExceeded(u64),

    #[error("reading the document failed: {0}")]
    Source(String),

    #[error("encryption was cancelled")]
    Cancelled,
}

impl From<PipeError> for io::Error {
    fn from(err: PipeError) -> Self {
        io::Error::new(io::ErrorKind::Other, err)
    }
}

struct State {
    buffer: BytesMut,
    capacity: usize,
    write_closed: bool,
    reader_dropped: bool,
    error: Option<PipeError>,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl State {
    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }

    fn set_error(&mut self, err: PipeError) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(err);
        self.wake_reader();
        self.wake_writer();
        true
    }

    fn close_write(&mut self) {
        self.write_closed = true;
        self.wake_reader();
    }
}

/// Create a pipe buffering at most `capacity` bytes
pub fn relay_pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Mutex::new(State {
        buffer: BytesMut::with_capacity(capacity.max(1)),
        capacity: capacity.max(1),
        write_closed: false,
        reader_dropped: false,
        error: None,
        read_waker: None,
        write_waker: None,
    }));
    (
        PipeWriter {
            shared: shared.clone(),
            finished: false,
        },
        PipeReader { shared },
    )
}

/// Write half. Dropping it without [`close`](Self::close) or
/// [`fail`](Self::fail) poisons the pipe with [`PipeError::Cancelled`].
pub struct PipeWriter {
    shared: Arc<Mutex<State>>,
    finished: bool,
}

impl PipeWriter {
    /// Store a terminal error unless one is already set.
    /// Returns whether this call's error was stored.
    pub fn set_error(&self, err: PipeError) -> bool {
        self.shared.lock().set_error(err)
    }

    /// Signal end of data. Buffered bytes stay readable.
    pub fn close(mut self) {
        self.finish();
    }

    /// Set `err` and close, in that order
    pub fn fail(mut self, err: PipeError) {
        self.set_error(err);
        self.finish();
    }

    /// Whether the consumer has gone away
    pub fn reader_detached(&self) -> bool {
        self.shared.lock().reader_dropped
    }

    /// Handle for inspecting the error slot after the writer is gone
    pub fn error_slot(&self) -> PipeErrorSlot {
        PipeErrorSlot {
            shared: self.shared.clone(),
        }
    }

    fn finish(&mut self) {
        self.shared.lock().close_write();
        self.finished = true;
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = self.shared.lock();
            state.set_error(PipeError::Cancelled);
            state.close_write();
        }
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut state = self.shared.lock();
        if let Some(err) = &state.error {
            return Poll::Ready(Err(err.clone().into()));
        }
        if state.reader_dropped {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "relay pipe reader detached",
            )));
        }
        if state.write_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "relay pipe is closed",
            )));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let space = state.capacity.saturating_sub(state.buffer.len());
        if space == 0 {
            state.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let n = space.min(buf.len());
        state.buffer.extend_from_slice(&buf[..n]);
        state.wake_reader();
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &self.shared.lock().error {
            Some(err) => Poll::Ready(Err(err.clone().into())),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().finish();
        Poll::Ready(Ok(()))
    }
}

/// Read half, yielding chunks in write order
pub struct PipeReader {
    shared: Arc<Mutex<State>>,
}

impl Stream for PipeReader {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = self.shared.lock();
        if let Some(err) = &state.error {
            return Poll::Ready(Some(Err(err.clone().into())));
        }
        if !state.buffer.is_empty() {
            let chunk = state.buffer.split().freeze();
            state.wake_writer();
            return Poll::Ready(Some(Ok(chunk)));
        }
        if state.write_closed {
            return Poll::Ready(None);
        }
        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.reader_dropped = true;
        state.wake_writer();
    }
}

/// Read-only view of a pipe's error slot
#[derive(Clone)]
pub struct PipeErrorSlot {
    shared: Arc<Mutex<State>>,
}

impl PipeErrorSlot {
    pub fn error(&self) -> Option<PipeError> {
        self.shared.lock().error.clone()
    }
}
