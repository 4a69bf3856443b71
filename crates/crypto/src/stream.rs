// Path: crates/crypto/src/stream.rs
//! Segmented body encryption and the decrypting reader.
//!
//! The body of an object is a sequence of independently sealed segments of
//! [`crate::SEGMENT_SIZE`] plaintext bytes; every segment on the wire is
//! nonce || ciphertext || tag. Only the final segment may be shorter.

use crate::header::{deconstruct_header, encrypt_header, header_len};
use crate::{CIPHER_SEGMENT_SIZE, NONCE_LEN, SEGMENT_SIZE, TAG_LEN};
use arca_types::error::CryptoError;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Seals one plaintext segment. `plaintext` must not exceed
/// [`SEGMENT_SIZE`].
pub fn encrypt_segment(plaintext: &[u8], data_key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() > SEGMENT_SIZE {
        return Err(CryptoError::InvalidHeader("oversized segment".into()));
    }
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(data_key));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::Aead)?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Opens one sealed segment.
pub fn decrypt_segment(segment: &[u8], data_key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    if segment.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::InvalidHeader("truncated segment".into()));
    }
    let (nonce, sealed) = segment.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(data_key));
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::Aead)
}

/// Seals a whole plaintext into consecutive segments.
pub fn encrypt_segments(plaintext: &[u8], data_key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(
        (plaintext.len() / SEGMENT_SIZE + 1) * CIPHER_SEGMENT_SIZE,
    );
    for chunk in plaintext.chunks(SEGMENT_SIZE) {
        out.extend_from_slice(&encrypt_segment(chunk, data_key)?);
    }
    Ok(out)
}

/// Produces a complete object (header plus sealed body) for the listed
/// recipients, under a fresh random data key. This is the producer side of
/// the format, used by upload tooling and tests.
pub fn encrypt_object(plaintext: &[u8], recipients: &[PublicKey]) -> Result<Vec<u8>, CryptoError> {
    let mut data_key = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(data_key.as_mut());
    let mut out = encrypt_header(&data_key, recipients)?;
    out.extend_from_slice(&encrypt_segments(plaintext, &data_key)?);
    Ok(out)
}

/// Probes the start of an uploaded object: parses the header, opens it with
/// `secret`, and decrypts at least the first byte of the body. Returns the
/// exact header bytes on success so the caller can strip them.
///
/// `buf` must hold the complete header and the complete first body segment
/// (callers read at least 4 MiB, far more than both).
pub fn try_decrypt(buf: &[u8], secret: &StaticSecret) -> Result<Vec<u8>, CryptoError> {
    let hlen = header_len(buf)?;
    let header = &buf[..hlen];
    let data_key = deconstruct_header(header, secret)?;

    let body = &buf[hlen..];
    if body.is_empty() {
        return Err(CryptoError::InvalidHeader("empty body".into()));
    }
    let first = &body[..body.len().min(CIPHER_SEGMENT_SIZE)];
    let plain = decrypt_segment(first, &data_key)?;
    if plain.is_empty() {
        return Err(CryptoError::InvalidHeader("empty first segment".into()));
    }
    Ok(header.to_vec())
}

/// An async reader that opens an envelope stream (header followed by sealed
/// body) and serves the decrypted plaintext sequentially.
pub struct EnvelopeReader<R> {
    inner: R,
    data_key: Zeroizing<[u8; 32]>,
    segment: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin + Send> EnvelopeReader<R> {
    /// Reads and opens the header from the front of `inner`.
    pub async fn new(mut inner: R, secret: &StaticSecret) -> Result<Self, CryptoError> {
        let mut preamble = [0u8; 16];
        inner.read_exact(&mut preamble).await?;
        if &preamble[0..8] != crate::header::MAGIC {
            return Err(CryptoError::InvalidHeader("bad magic".into()));
        }
        let version = u32::from_le_bytes([preamble[8], preamble[9], preamble[10], preamble[11]]);
        if version != crate::header::VERSION {
            return Err(CryptoError::UnsupportedVersion(version));
        }
        let mut header = preamble.to_vec();

        let packet_count = u32::from_le_bytes([preamble[12], preamble[13], preamble[14], preamble[15]]);
        if packet_count == 0 || packet_count > 1024 {
            return Err(CryptoError::InvalidHeader("implausible packet count".into()));
        }
        for _ in 0..packet_count {
            let mut len_bytes = [0u8; 4];
            inner.read_exact(&mut len_bytes).await?;
            let packet_len = u32::from_le_bytes(len_bytes) as usize;
            if packet_len < 4 || packet_len > 4096 {
                return Err(CryptoError::InvalidHeader("implausible packet length".into()));
            }
            let mut packet = vec![0u8; packet_len - 4];
            inner.read_exact(&mut packet).await?;
            header.extend_from_slice(&len_bytes);
            header.extend_from_slice(&packet);
        }

        let data_key = deconstruct_header(&header, secret)?;
        Ok(EnvelopeReader {
            inner,
            data_key,
            segment: Vec::new(),
            pos: 0,
            eof: false,
        })
    }

    /// Fills the internal buffer with the next decrypted segment.
    async fn refill(&mut self) -> Result<(), CryptoError> {
        let mut sealed = vec![0u8; CIPHER_SEGMENT_SIZE];
        let mut filled = 0;
        while filled < sealed.len() {
            let n = self.inner.read(&mut sealed[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            self.eof = true;
            self.segment.clear();
            self.pos = 0;
            return Ok(());
        }
        sealed.truncate(filled);
        self.segment = decrypt_segment(&sealed, &self.data_key)?;
        self.pos = 0;
        Ok(())
    }

    /// Reads decrypted bytes into `buf`, returning 0 at end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, CryptoError> {
        if self.pos >= self.segment.len() {
            if self.eof {
                return Ok(0);
            }
            self.refill().await?;
            if self.segment.is_empty() {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.segment.len() - self.pos);
        buf[..n].copy_from_slice(&self.segment[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    /// Skips `n` plaintext bytes by decrypting and discarding.
    pub async fn skip(&mut self, mut n: u64) -> Result<(), CryptoError> {
        let mut scratch = [0u8; 4096];
        while n > 0 {
            let want = scratch.len().min(n as usize);
            let got = self.read(&mut scratch[..want]).await?;
            if got == 0 {
                break;
            }
            n -= got as u64;
        }
        Ok(())
    }
}
