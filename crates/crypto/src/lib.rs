// Path: crates/crypto/src/lib.rs
#![forbid(unsafe_code)]

//! # ARCA Crypto
//!
//! The envelope format used end to end by the pipeline: an uploaded object is
//! a self-describing header (recipient-wrapped data-encryption key) followed
//! by the body in fixed-size AEAD segments. Ingest splits the two, the state
//! store keeps custody of the header bytes, the archive keeps the body, and
//! the download path puts them back together.
//!
//! Primitives come from `x25519-dalek` and `chacha20poly1305`; this crate
//! only defines the container.

/// Header construction, parsing and rewrap.
pub mod header;
/// Key pairs and passphrase-locked key files.
pub mod keys;
/// Segmented body encryption and the decrypting reader.
pub mod stream;

pub use arca_types::error::CryptoError;

/// Plaintext bytes per body segment.
pub const SEGMENT_SIZE: usize = 65536;
/// Nonce length prepended to every encrypted segment.
pub const NONCE_LEN: usize = 12;
/// Poly1305 tag length appended to every encrypted segment.
pub const TAG_LEN: usize = 16;
/// Bytes per encrypted body segment: 64 KiB plus nonce and tag.
pub const CIPHER_SEGMENT_SIZE: usize = SEGMENT_SIZE + NONCE_LEN + TAG_LEN;
