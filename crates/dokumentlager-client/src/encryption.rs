//! Background encryption of one document into a relay pipe

use crate::{
    input::{BoundedInput, InputMonitor},
    pipe::{PipeError, PipeWriter},
};
use dokumentlager_crypto::{CryptoError, EncryptionCertificate, StreamEncryptor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument, Span};

/// Everything one encryption run needs. The job owns the pipe writer, so
/// the pipe is finished on every exit path.
pub struct EncryptionJob {
    input: BoundedInput,
    writer: PipeWriter,
    certificate: Arc<EncryptionCertificate>,
    encryptor: Arc<dyn StreamEncryptor>,
    span: Span,
}

impl EncryptionJob {
    pub fn new(
        input: BoundedInput,
        writer: PipeWriter,
        certificate: Arc<EncryptionCertificate>,
        encryptor: Arc<dyn StreamEncryptor>,
    ) -> Self {
        Self {
            input,
            writer,
            certificate,
            encryptor,
            span: Span::none(),
        }
    }

    /// Run inside `span`, typically created by the caller to carry its request id
    pub fn in_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Encrypt until the input ends, the engine fails or `cancel` fires.
    /// Returns the number of plaintext bytes consumed.
    pub async fn run(self, cancel: CancellationToken) -> Result<u64, PipeError> {
        let span = self.span.clone();
        self.execute(cancel).instrument(span).await
    }

    async fn execute(self, cancel: CancellationToken) -> Result<u64, PipeError> {
        let Self {
            mut input,
            mut writer,
            certificate,
            encryptor,
            ..
        } = self;
        let monitor = input.monitor();

        debug!("Encryption started");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = encryptor.encrypt(&mut input, &mut writer, certificate.as_ref()) => Some(result),
        };

        match outcome {
            Some(Ok(consumed)) => {
                writer.close();
                debug!(consumed, "Encryption finished");
                Ok(consumed)
            }
            Some(Err(err)) => {
                let err = classify(err, &monitor, input.limit(), writer.reader_detached());
                debug!(error = %err, "Encryption stopped");
                writer.fail(err.clone());
                Err(err)
            }
            None => {
                debug!("Encryption cancelled");
                writer.fail(PipeError::Cancelled);
                Err(PipeError::Cancelled)
            }
        }
    }
}

/// Map an engine failure to the cause the uploader should see
fn classify(err: CryptoError, monitor: &InputMonitor, limit: Option<u64>, detached: bool) -> PipeError {
    if monitor.tripped() {
        return PipeError::LimitExceeded(limit.unwrap_or_default());
    }
    // The request gave up on the body; its own error is the real cause.
    if detached {
        return PipeError::Cancelled;
    }
    match err {
        CryptoError::Io(e) => PipeError::Source(e.to_string()),
        CryptoError::Encryption(message) => PipeError::Encryption(message),
        other => PipeError::Encryption(other.to_string()),
    }
}
