// Path: crates/crypto/src/keys.rs
//! Key pairs and passphrase-locked key files.
//!
//! Key file format V1:
//! [ Magic: "ARCA-KEY" (8) ]
//! [ Version: u16 (2) ]
//! [ Salt: 16B ]
//! [ Nonce: 12B ]
//! [ Ciphertext + Tag: 32 + 16 ]

use arca_types::error::CryptoError;
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

const KEY_MAGIC: &[u8; 8] = b"ARCA-KEY";
const KEY_VERSION: u16 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 8 + 2 + SALT_LEN + NONCE_LEN;

/// An X25519 key pair.
pub struct KeyPair {
    /// The secret half.
    pub secret: StaticSecret,
    /// The public half.
    pub public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        KeyPair { secret, public }
    }
}

/// Hex SHA-256 digest of a public key, as registered in the key-hash table.
pub fn public_key_hash(public: &PublicKey) -> String {
    hex::encode(Sha256::digest(public.as_bytes()))
}

fn derive_kek(passphrase: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut kek = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut kek)
        .map_err(|e| CryptoError::InvalidKey(format!("key derivation failed: {e}")))?;
    Ok(kek)
}

/// Wraps a secret key under a passphrase into the V1 key file format.
pub fn encrypt_key(secret: &StaticSecret, passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let kek = Zeroizing::new(derive_kek(passphrase, &salt)?);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&*kek));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_bytes().as_slice())
        .map_err(|_| CryptoError::Aead)?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(KEY_MAGIC);
    out.extend_from_slice(&KEY_VERSION.to_be_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unwraps a V1 key file blob with the passphrase.
pub fn decrypt_key(data: &[u8], passphrase: &str) -> Result<StaticSecret, CryptoError> {
    if data.len() < HEADER_LEN {
        return Err(CryptoError::InvalidKey("key file too short".into()));
    }
    if &data[0..8] != KEY_MAGIC {
        return Err(CryptoError::InvalidKey("invalid key file signature".into()));
    }
    let version = u16::from_be_bytes([data[8], data[9]]);
    if version != KEY_VERSION {
        return Err(CryptoError::InvalidKey(format!(
            "unsupported key file version: {version}"
        )));
    }
    let salt = &data[10..10 + SALT_LEN];
    let nonce = &data[10 + SALT_LEN..HEADER_LEN];
    let ciphertext = &data[HEADER_LEN..];

    let kek = Zeroizing::new(derive_kek(passphrase, salt)?);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&*kek));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Aead)?,
    );
    let bytes: [u8; 32] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("key file holds a malformed secret".into()))?;
    Ok(StaticSecret::from(bytes))
}

/// Writes a passphrase-locked key file.
pub fn save_key_file(
    path: &Path,
    secret: &StaticSecret,
    passphrase: &str,
) -> Result<(), CryptoError> {
    let blob = encrypt_key(secret, passphrase)?;
    std::fs::write(path, blob)?;
    Ok(())
}

/// Loads and unlocks a key file. Required at service startup; an unreadable
/// or unopenable key is a fatal configuration error for the caller.
pub fn load_key_file(path: &Path, passphrase: &str) -> Result<StaticSecret, CryptoError> {
    let blob = std::fs::read(path)?;
    decrypt_key(&blob, passphrase)
}
