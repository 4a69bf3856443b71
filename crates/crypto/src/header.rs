// Path: crates/crypto/src/header.rs
//! Header construction, parsing and rewrap.
//!
//! Layout:
//! [ Magic: "crypt4gh" (8) ]
//! [ Version: u32 LE (4) ]
//! [ Packet count: u32 LE (4) ]
//! followed by one packet per recipient:
//! [ Packet length: u32 LE (4), includes itself ]
//! [ Key-wrap method: u32 LE (4), 0 = X25519 + ChaCha20-Poly1305 ]
//! [ Writer public key (32) ]
//! [ Nonce (12) ]
//! [ Encrypted packet content + tag (40 + 16) ]
//!
//! Packet content (encrypted): packet type u32 LE (0 = data key), body
//! encryption method u32 LE (0), data-encryption key (32).

use crate::{NONCE_LEN, TAG_LEN};
use arca_types::error::CryptoError;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

pub(crate) const MAGIC: &[u8; 8] = b"crypt4gh";
pub(crate) const VERSION: u32 = 1;
const PREAMBLE_LEN: usize = 8 + 4 + 4;

const METHOD_X25519_CHACHA20: u32 = 0;
const PACKET_TYPE_DATA_KEY: u32 = 0;
const BODY_METHOD_CHACHA20: u32 = 0;

/// Plain packet content: type, body method, data key.
const PACKET_CONTENT_LEN: usize = 4 + 4 + 32;
/// Full packet: length field, method, writer key, nonce, sealed content.
const PACKET_LEN: usize = 4 + 4 + 32 + NONCE_LEN + PACKET_CONTENT_LEN + TAG_LEN;

/// The key wrapping a packet is bound to both parties and the shared secret.
fn wrap_key(shared: &[u8; 32], writer_pub: &PublicKey, reader_pub: &PublicKey) -> Key {
    let mut h = Sha256::new();
    h.update(shared);
    h.update(writer_pub.as_bytes());
    h.update(reader_pub.as_bytes());
    let digest: [u8; 32] = h.finalize().into();
    *Key::from_slice(&digest)
}

/// Builds a header granting every listed recipient access to `data_key`.
/// Each packet uses a fresh ephemeral writer key.
pub fn encrypt_header(
    data_key: &[u8; 32],
    recipients: &[PublicKey],
) -> Result<Vec<u8>, CryptoError> {
    if recipients.is_empty() {
        return Err(CryptoError::InvalidKey("no recipients for header".into()));
    }

    let mut out = Vec::with_capacity(PREAMBLE_LEN + recipients.len() * PACKET_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(recipients.len() as u32).to_le_bytes());

    let mut content = Zeroizing::new([0u8; PACKET_CONTENT_LEN]);
    content[0..4].copy_from_slice(&PACKET_TYPE_DATA_KEY.to_le_bytes());
    content[4..8].copy_from_slice(&BODY_METHOD_CHACHA20.to_le_bytes());
    content[8..40].copy_from_slice(data_key);

    for recipient in recipients {
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let writer_pub = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(recipient);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = wrap_key(shared.as_bytes(), &writer_pub, recipient);
        let cipher = ChaCha20Poly1305::new(&key);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), content.as_slice())
            .map_err(|_| CryptoError::Aead)?;

        out.extend_from_slice(&(PACKET_LEN as u32).to_le_bytes());
        out.extend_from_slice(&METHOD_X25519_CHACHA20.to_le_bytes());
        out.extend_from_slice(writer_pub.as_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
    }

    Ok(out)
}

/// Walks the packet table and returns the total header length, without
/// decrypting anything. `buf` must hold at least the complete header.
pub fn header_len(buf: &[u8]) -> Result<usize, CryptoError> {
    if buf.len() < PREAMBLE_LEN {
        return Err(CryptoError::InvalidHeader("truncated preamble".into()));
    }
    if &buf[0..8] != MAGIC {
        return Err(CryptoError::InvalidHeader("bad magic".into()));
    }
    let version = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    if version != VERSION {
        return Err(CryptoError::UnsupportedVersion(version));
    }
    let packet_count = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]) as usize;
    if packet_count == 0 {
        return Err(CryptoError::InvalidHeader("zero header packets".into()));
    }

    let mut offset = PREAMBLE_LEN;
    for _ in 0..packet_count {
        let Some(len_bytes) = buf.get(offset..offset + 4) else {
            return Err(CryptoError::InvalidHeader("truncated packet table".into()));
        };
        let packet_len =
            u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        if packet_len < 4 || buf.len() < offset + packet_len {
            return Err(CryptoError::InvalidHeader("truncated packet".into()));
        }
        offset += packet_len;
    }
    Ok(offset)
}

/// Extracts the complete header bytes from the front of `buf`.
pub fn read_header(buf: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let len = header_len(buf)?;
    Ok(buf[..len].to_vec())
}

/// Opens the header with the reader's secret key and returns the
/// data-encryption key. Fails when no packet can be opened.
pub fn deconstruct_header(
    header: &[u8],
    reader_secret: &StaticSecret,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let total = header_len(header)?;
    let reader_pub = PublicKey::from(reader_secret);

    let mut offset = PREAMBLE_LEN;
    while offset < total {
        let packet_len = u32::from_le_bytes([
            header[offset],
            header[offset + 1],
            header[offset + 2],
            header[offset + 3],
        ]) as usize;
        let packet = &header[offset..offset + packet_len];
        offset += packet_len;

        if packet.len() != PACKET_LEN {
            continue;
        }
        let method = u32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]);
        if method != METHOD_X25519_CHACHA20 {
            continue;
        }
        let writer_bytes: [u8; 32] = packet[8..40].try_into().map_err(|_| CryptoError::Aead)?;
        let writer_pub = PublicKey::from(writer_bytes);
        let nonce = &packet[40..40 + NONCE_LEN];
        let sealed = &packet[40 + NONCE_LEN..];

        let shared = reader_secret.diffie_hellman(&writer_pub);
        let key = wrap_key(shared.as_bytes(), &writer_pub, &reader_pub);
        let cipher = ChaCha20Poly1305::new(&key);
        if let Ok(content) = cipher.decrypt(Nonce::from_slice(nonce), sealed) {
            if content.len() == PACKET_CONTENT_LEN {
                let packet_type = u32::from_le_bytes([content[0], content[1], content[2], content[3]]);
                if packet_type == PACKET_TYPE_DATA_KEY {
                    let mut data_key = Zeroizing::new([0u8; 32]);
                    data_key.copy_from_slice(&content[8..40]);
                    return Ok(data_key);
                }
            }
        }
    }
    Err(CryptoError::NoMatchingKey)
}

/// Produces a new header granting `recipient` access to the same body the
/// old header protects. This is the whole of the rewrap operation; the body
/// is untouched.
pub fn reencrypt_header(
    old_header: &[u8],
    service_secret: &StaticSecret,
    recipient: &PublicKey,
) -> Result<Vec<u8>, CryptoError> {
    let data_key = deconstruct_header(old_header, service_secret)?;
    encrypt_header(&data_key, std::slice::from_ref(recipient))
}
