//! Streaming envelope encryption
//!
//! An envelope is a header followed by a sequence of AEAD frames:
//!
//! ```text
//! header := "DLE1" | version u8 | wrapped_len u16 BE | wrapped DEK | nonce prefix [7]
//! frame  := flag u8 (0 = more, 1 = final) | len u32 BE | AES-256-GCM(chunk)
//! ```
//!
//! The DEK is wrapped with RSA-OAEP (SHA-256) to the recipient certificate.
//! Every frame authenticates the header as associated data, and an envelope
//! always ends with exactly one final frame (possibly empty), so truncation
//! at a frame boundary is detected.
//!
//! The format is not CMS EnvelopedData and is not readable by services that
//! expect CMS.

use crate::{
    certificate::{DecryptionKey, EncryptionCertificate},
    keys::DekKey,
    symmetric::{random_prefix, Aead, Nonce, NONCE_PREFIX_SIZE, TAG_SIZE},
    CryptoError, Result,
};
use async_trait::async_trait;
use rand::rngs::OsRng;
use rsa::Oaep;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Envelope magic bytes
pub const MAGIC: &[u8; 4] = b"DLE1";

/// Envelope format version
pub const FORMAT_VERSION: u8 = 1;

/// Default plaintext chunk size (64 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest frame a decryptor accepts (16 MB of plaintext)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024 + TAG_SIZE;

const PRELUDE_SIZE: usize = MAGIC.len() + 1 + 2;
const FRAME_HEADER_SIZE: usize = 5;
const FLAG_MORE: u8 = 0;
const FLAG_FINAL: u8 = 1;

/// Encrypts a plaintext stream to a recipient certificate.
///
/// Implementations must either write a complete ciphertext or return an
/// error. The output is left open; closing it is the caller's business.
#[async_trait]
pub trait StreamEncryptor: Send + Sync {
    /// Encrypt everything `input` yields into `output`, returning the
    /// number of plaintext bytes consumed.
    async fn encrypt(
        &self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
        certificate: &EncryptionCertificate,
    ) -> Result<u64>;
}

/// Seals successive plaintext chunks into frames
pub struct FrameSealer {
    aead: Aead,
    prefix: [u8; NONCE_PREFIX_SIZE],
    header: Vec<u8>,
    counter: u32,
    finished: bool,
}

impl FrameSealer {
    /// Start a new envelope for `certificate`, with a fresh DEK
    pub fn new(certificate: &EncryptionCertificate) -> Result<Self> {
        let dek = DekKey::generate();
        let wrapped = certificate
            .public_key()
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), dek.as_bytes())
            .map_err(|e| CryptoError::Encryption(format!("key wrapping failed: {}", e)))?;
        let wrapped_len = u16::try_from(wrapped.len())
            .map_err(|_| CryptoError::InvalidKey("recipient key is too large".to_string()))?;

        let prefix = random_prefix();
        let mut header = Vec::with_capacity(PRELUDE_SIZE + wrapped.len() + NONCE_PREFIX_SIZE);
        header.extend_from_slice(MAGIC);
        header.push(FORMAT_VERSION);
        header.extend_from_slice(&wrapped_len.to_be_bytes());
        header.extend_from_slice(&wrapped);
        header.extend_from_slice(&prefix);

        Ok(Self {
            aead: Aead::new(&dek)?,
            prefix,
            header,
            counter: 0,
            finished: false,
        })
    }

    /// The envelope header, to be written before any frame
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Seal one chunk into a complete frame
    pub fn seal(&mut self, chunk: &[u8], last: bool) -> Result<Vec<u8>> {
        if self.finished {
            return Err(CryptoError::Encryption("envelope already finished".to_string()));
        }
        if !last && self.counter == u32::MAX {
            return Err(CryptoError::Encryption("too many frames".to_string()));
        }

        let nonce = Nonce::for_frame(&self.prefix, self.counter, last);
        let ciphertext = self.aead.encrypt_with_aad(&nonce, chunk, &self.header)?;
        let len = u32::try_from(ciphertext.len())
            .map_err(|_| CryptoError::Encryption("chunk too large".to_string()))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + ciphertext.len());
        frame.push(if last { FLAG_FINAL } else { FLAG_MORE });
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&ciphertext);

        self.counter = self.counter.wrapping_add(1);
        self.finished = last;
        Ok(frame)
    }
}

/// Opens frames of one envelope, in order
pub struct FrameOpener {
    aead: Aead,
    prefix: [u8; NONCE_PREFIX_SIZE],
    header: Vec<u8>,
    counter: u32,
    finished: bool,
}

impl FrameOpener {
    /// Parse the fixed prelude, returning the wrapped key length
    fn prelude(bytes: &[u8]) -> Result<usize> {
        if bytes.len() < PRELUDE_SIZE {
            return Err(CryptoError::Truncated("incomplete envelope header".to_string()));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(CryptoError::InvalidCiphertext("not a dokumentlager envelope".to_string()));
        }
        if bytes[MAGIC.len()] != FORMAT_VERSION {
            return Err(CryptoError::InvalidCiphertext(format!(
                "unsupported envelope version {}",
                bytes[MAGIC.len()]
            )));
        }
        Ok(u16::from_be_bytes([bytes[MAGIC.len() + 1], bytes[MAGIC.len() + 2]]) as usize)
    }

    /// Total header length implied by a prelude
    fn header_len(wrapped_len: usize) -> usize {
        PRELUDE_SIZE + wrapped_len + NONCE_PREFIX_SIZE
    }

    /// Build an opener from a complete header
    fn from_header(header: &[u8], key: &DecryptionKey) -> Result<Self> {
        let wrapped_len = Self::prelude(header)?;
        if header.len() != Self::header_len(wrapped_len) {
            return Err(CryptoError::Truncated("incomplete envelope header".to_string()));
        }

        let wrapped = &header[PRELUDE_SIZE..PRELUDE_SIZE + wrapped_len];
        let dek_bytes = key
            .private_key()
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| CryptoError::Decryption("envelope key does not match this private key".to_string()))?;
        let dek = DekKey::from_bytes(&dek_bytes)?;

        let mut prefix = [0u8; NONCE_PREFIX_SIZE];
        prefix.copy_from_slice(&header[PRELUDE_SIZE + wrapped_len..]);

        Ok(Self {
            aead: Aead::new(&dek)?,
            prefix,
            header: header.to_vec(),
            counter: 0,
            finished: false,
        })
    }

    /// Validate a frame header, returning `(last, ciphertext_len)`
    fn frame_header(&self, bytes: [u8; FRAME_HEADER_SIZE]) -> Result<(bool, usize)> {
        if self.finished {
            return Err(CryptoError::InvalidCiphertext("data after final frame".to_string()));
        }
        let last = match bytes[0] {
            FLAG_MORE => false,
            FLAG_FINAL => true,
            other => {
                return Err(CryptoError::InvalidCiphertext(format!("unknown frame flag {}", other)))
            }
        };
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        if !(TAG_SIZE..=MAX_FRAME_SIZE).contains(&len) {
            return Err(CryptoError::InvalidCiphertext(format!("invalid frame length {}", len)));
        }
        Ok((last, len))
    }

    fn open(&mut self, ciphertext: &[u8], last: bool) -> Result<Vec<u8>> {
        let nonce = Nonce::for_frame(&self.prefix, self.counter, last);
        let plaintext = self.aead.decrypt_with_aad(&nonce, ciphertext, &self.header)?;
        self.counter = self.counter.wrapping_add(1);
        self.finished = last;
        Ok(plaintext)
    }
}

/// Default [`StreamEncryptor`] producing dokumentlager envelopes
#[derive(Clone, Debug)]
pub struct EnvelopeEncryptor {
    chunk_size: usize,
}

impl Default for EnvelopeEncryptor {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl EnvelopeEncryptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different plaintext chunk size (clamped to 1 B..=16 MB)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_FRAME_SIZE - TAG_SIZE);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// Fill `buf` from `input`, stopping early only at end of stream
async fn read_chunk(input: &mut (dyn AsyncRead + Send + Unpin), buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl StreamEncryptor for EnvelopeEncryptor {
    async fn encrypt(
        &self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
        certificate: &EncryptionCertificate,
    ) -> Result<u64> {
        let mut sealer = FrameSealer::new(certificate)?;
        output.write_all(sealer.header()).await?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let n = read_chunk(input, &mut buf).await?;
            total += n as u64;
            let last = n < buf.len();
            let frame = sealer.seal(&buf[..n], last)?;
            output.write_all(&frame).await?;
            if last {
                break;
            }
        }
        output.flush().await?;

        tracing::trace!(plaintext_bytes = total, "Envelope sealed");
        Ok(total)
    }
}

/// Decrypts dokumentlager envelopes with the recipient's private key
pub struct EnvelopeDecryptor {
    key: DecryptionKey,
}

impl EnvelopeDecryptor {
    pub fn new(key: DecryptionKey) -> Self {
        Self { key }
    }

    /// Decrypt a complete envelope held in memory
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        let wrapped_len = FrameOpener::prelude(envelope)?;
        let header_len = FrameOpener::header_len(wrapped_len);
        if envelope.len() < header_len {
            return Err(CryptoError::Truncated("incomplete envelope header".to_string()));
        }
        let mut opener = FrameOpener::from_header(&envelope[..header_len], &self.key)?;

        let mut rest = &envelope[header_len..];
        let mut plaintext = Vec::with_capacity(rest.len());
        while !opener.finished {
            if rest.len() < FRAME_HEADER_SIZE {
                return Err(CryptoError::Truncated("missing final frame".to_string()));
            }
            let mut frame_header = [0u8; FRAME_HEADER_SIZE];
            frame_header.copy_from_slice(&rest[..FRAME_HEADER_SIZE]);
            let (last, len) = opener.frame_header(frame_header)?;
            rest = &rest[FRAME_HEADER_SIZE..];
            if rest.len() < len {
                return Err(CryptoError::Truncated("incomplete frame".to_string()));
            }
            plaintext.extend_from_slice(&opener.open(&rest[..len], last)?);
            rest = &rest[len..];
        }
        if !rest.is_empty() {
            return Err(CryptoError::InvalidCiphertext("data after final frame".to_string()));
        }
        Ok(plaintext)
    }

    /// Decrypt an envelope from `input` into `output`, returning the number
    /// of plaintext bytes written. Output is flushed but not shut down.
    pub async fn decrypt_stream<R, W>(&self, input: &mut R, output: &mut W) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut header = vec![0u8; PRELUDE_SIZE];
        read_exact_or_truncated(input, &mut header, "incomplete envelope header").await?;
        let wrapped_len = FrameOpener::prelude(&header)?;
        header.resize(FrameOpener::header_len(wrapped_len), 0);
        read_exact_or_truncated(input, &mut header[PRELUDE_SIZE..], "incomplete envelope header").await?;
        let mut opener = FrameOpener::from_header(&header, &self.key)?;

        let mut total = 0u64;
        let mut ciphertext = Vec::new();
        while !opener.finished {
            let mut frame_header = [0u8; FRAME_HEADER_SIZE];
            read_exact_or_truncated(input, &mut frame_header, "missing final frame").await?;
            let (last, len) = opener.frame_header(frame_header)?;
            ciphertext.resize(len, 0);
            read_exact_or_truncated(input, &mut ciphertext, "incomplete frame").await?;
            let plaintext = opener.open(&ciphertext, last)?;
            output.write_all(&plaintext).await?;
            total += plaintext.len() as u64;
        }

        let mut trailing = [0u8; 1];
        if input.read(&mut trailing).await? != 0 {
            return Err(CryptoError::InvalidCiphertext("data after final frame".to_string()));
        }
        output.flush().await?;
        Ok(total)
    }
}

async fn read_exact_or_truncated<R>(input: &mut R, buf: &mut [u8], what: &str) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match input.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(CryptoError::Truncated(what.to_string())),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::sync::OnceLock;

    const CERT: &str = include_str!("../tests/fixtures/test-certificate.pem");
    const KEY: &str = include_str!("../tests/fixtures/test-private-key.pem");

    fn certificate() -> &'static EncryptionCertificate {
        static CELL: OnceLock<EncryptionCertificate> = OnceLock::new();
        CELL.get_or_init(|| EncryptionCertificate::from_pem(CERT).unwrap())
    }

    fn decryptor() -> &'static EnvelopeDecryptor {
        static CELL: OnceLock<EnvelopeDecryptor> = OnceLock::new();
        CELL.get_or_init(|| EnvelopeDecryptor::new(DecryptionKey::from_pem(KEY).unwrap()))
    }

    async fn seal(encryptor: &EnvelopeEncryptor, plaintext: &[u8]) -> Vec<u8> {
        let mut input = plaintext;
        let mut output = Vec::new();
        let consumed = encryptor.encrypt(&mut input, &mut output, certificate()).await.unwrap();
        assert_eq!(consumed, plaintext.len() as u64);
        output
    }

    #[rstest]
    #[case::empty(0)]
    #[case::one_byte(1)]
    #[case::exact_chunk(64)]
    #[case::chunk_and_a_bit(65)]
    #[case::several_chunks(64 * 5 + 17)]
    #[tokio::test]
    async fn test_roundtrip_chunk_boundaries(#[case] len: usize) {
        let encryptor = EnvelopeEncryptor::new().with_chunk_size(64);
        let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

        let envelope = seal(&encryptor, &plaintext).await;
        assert_eq!(&envelope[..4], MAGIC);
        assert_eq!(decryptor().decrypt(&envelope).unwrap(), plaintext);
    }

    #[tokio::test]
    async fn test_stream_decrypt_matches_buffer_decrypt() {
        let encryptor = EnvelopeEncryptor::new().with_chunk_size(1000);
        let plaintext = vec![0x5Au8; 12_345];
        let envelope = seal(&encryptor, &plaintext).await;

        let mut input = envelope.as_slice();
        let mut output = Vec::new();
        let written = decryptor().decrypt_stream(&mut input, &mut output).await.unwrap();
        assert_eq!(written, plaintext.len() as u64);
        assert_eq!(output, plaintext);
    }

    #[tokio::test]
    async fn test_same_plaintext_encrypts_differently() {
        let encryptor = EnvelopeEncryptor::new();
        let a = seal(&encryptor, b"identical").await;
        let b = seal(&encryptor, b"identical").await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_tampered_frame_is_rejected() {
        let encryptor = EnvelopeEncryptor::new().with_chunk_size(16);
        let mut envelope = seal(&encryptor, b"a document that spans several frames").await;
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;

        assert!(matches!(decryptor().decrypt(&envelope), Err(CryptoError::Decryption(_))));
    }

    #[tokio::test]
    async fn test_tampered_header_is_rejected() {
        let mut envelope = seal(&EnvelopeEncryptor::new(), b"payload").await;
        // Last byte of the nonce prefix
        let index = FrameOpener::header_len(256) - 1;
        envelope[index] ^= 0x80;

        assert!(decryptor().decrypt(&envelope).is_err());
    }

    #[tokio::test]
    async fn test_truncation_at_frame_boundary_is_detected() {
        let encryptor = EnvelopeEncryptor::new().with_chunk_size(8);
        let envelope = seal(&encryptor, b"0123456789abcdef0123").await;

        // Drop the final frame: 4 bytes of plaintext plus tag plus frame header
        let cut = envelope.len() - (FRAME_HEADER_SIZE + 4 + TAG_SIZE);
        assert!(matches!(
            decryptor().decrypt(&envelope[..cut]),
            Err(CryptoError::Truncated(_))
        ));

        let mut input = &envelope[..cut];
        let mut sink = Vec::new();
        assert!(matches!(
            decryptor().decrypt_stream(&mut input, &mut sink).await,
            Err(CryptoError::Truncated(_))
        ));
    }

    #[tokio::test]
    async fn test_trailing_data_is_rejected() {
        let mut envelope = seal(&EnvelopeEncryptor::new(), b"payload").await;
        envelope.push(0);
        assert!(matches!(
            decryptor().decrypt(&envelope),
            Err(CryptoError::InvalidCiphertext(_))
        ));
    }

    #[test]
    fn test_rejects_foreign_data() {
        assert!(matches!(
            decryptor().decrypt(b"PK\x03\x04 definitely a zip"),
            Err(CryptoError::InvalidCiphertext(_))
        ));
        assert!(matches!(decryptor().decrypt(b"DLE"), Err(CryptoError::Truncated(_))));
    }

    #[tokio::test]
    async fn test_sealer_refuses_frames_after_final() {
        let mut sealer = FrameSealer::new(certificate()).unwrap();
        sealer.seal(b"done", true).unwrap();
        assert!(sealer.seal(b"more", false).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..4096), chunk in 1usize..512) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let encryptor = EnvelopeEncryptor::new().with_chunk_size(chunk);
            let envelope = runtime.block_on(seal(&encryptor, &plaintext));
            prop_assert_eq!(decryptor().decrypt(&envelope).unwrap(), plaintext);
        }
    }
}
