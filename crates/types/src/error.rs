// Path: crates/types/src/error.rs

//! Core error types for the ARCA pipeline.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A generic error originating from the underlying key-value backend.
    #[error("backend error: {0}")]
    Backend(String),
    /// An error occurred while serializing a row for storage.
    #[error("encode error: {0}")]
    Encode(String),
    /// An error occurred while deserializing a row from storage.
    #[error("decode error: {0}")]
    Decode(String),
    /// The requested row was not found.
    #[error("not found")]
    NotFound,
    /// A write matched no existing row.
    #[error("zero rows changed")]
    ZeroRowsChanged,
    /// A uniqueness fence was violated.
    #[error("duplicate key value violates unique constraint: {0}")]
    DuplicateKey(String),
    /// A referenced row does not exist.
    #[error("violates foreign key constraint: {0}")]
    ForeignKey(String),
    /// A key hash could not be deprecated.
    #[error("key hash not found or already deprecated")]
    KeyHashDeprecation,
    /// The on-disk schema version is older than this build supports.
    #[error("database schema v{required} is required, found v{found}")]
    SchemaVersion {
        /// Minimum supported schema version.
        required: u32,
        /// Version recorded in the sentinel table.
        found: u32,
    },
    /// A stored value failed a domain-level consistency check.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORE_BACKEND_ERROR",
            Self::Encode(_) => "STORE_ENCODE_ERROR",
            Self::Decode(_) => "STORE_DECODE_ERROR",
            Self::NotFound => "STORE_NOT_FOUND",
            Self::ZeroRowsChanged => "STORE_ZERO_ROWS_CHANGED",
            Self::DuplicateKey(_) => "STORE_DUPLICATE_KEY",
            Self::ForeignKey(_) => "STORE_FOREIGN_KEY",
            Self::KeyHashDeprecation => "STORE_KEY_HASH_DEPRECATION",
            Self::SchemaVersion { .. } => "STORE_SCHEMA_VERSION",
            Self::InvalidValue(_) => "STORE_INVALID_VALUE",
        }
    }
}

/// Errors from the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker connection has been closed or poisoned.
    #[error("broker connection closed")]
    Closed,
    /// The consumer channel has been closed.
    #[error("broker channel closed")]
    ChannelClosed,
    /// A generic error originating from the journal backend.
    #[error("backend error: {0}")]
    Backend(String),
    /// An error occurred while serializing a journal record.
    #[error("encode error: {0}")]
    Encode(String),
    /// An error occurred while deserializing a journal record.
    #[error("decode error: {0}")]
    Decode(String),
    /// The named queue does not exist.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    /// A delivery was acknowledged twice.
    #[error("delivery already settled")]
    AlreadySettled,
}

impl ErrorCode for BrokerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Closed => "BROKER_CLOSED",
            Self::ChannelClosed => "BROKER_CHANNEL_CLOSED",
            Self::Backend(_) => "BROKER_BACKEND_ERROR",
            Self::Encode(_) => "BROKER_ENCODE_ERROR",
            Self::Decode(_) => "BROKER_DECODE_ERROR",
            Self::UnknownQueue(_) => "BROKER_UNKNOWN_QUEUE",
            Self::AlreadySettled => "BROKER_ALREADY_SETTLED",
        }
    }
}

/// Errors from the JSON-schema validator.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The named schema document could not be read.
    #[error("schema {name} not readable: {reason}")]
    NotFound {
        /// Schema name as routed.
        name: String,
        /// Underlying read error.
        reason: String,
    },
    /// The schema document itself is not a valid JSON schema.
    #[error("schema {name} failed to compile: {reason}")]
    Compile {
        /// Schema name as routed.
        name: String,
        /// Compiler error text.
        reason: String,
    },
    /// The message body does not conform to the schema.
    #[error("message failed validation against {name}: {reason}")]
    Validation {
        /// Schema name as routed.
        name: String,
        /// Short reason suitable for an error envelope.
        reason: String,
    },
    /// The message body is not valid JSON at all.
    #[error("message is not valid JSON: {0}")]
    Json(String),
}

impl SchemaError {
    /// A short reason string for inclusion in an error envelope.
    pub fn reason(&self) -> String {
        match self {
            Self::NotFound { reason, .. } => reason.clone(),
            Self::Compile { reason, .. } => reason.clone(),
            Self::Validation { reason, .. } => reason.clone(),
            Self::Json(reason) => reason.clone(),
        }
    }
}

impl ErrorCode for SchemaError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "SCHEMA_NOT_FOUND",
            Self::Compile { .. } => "SCHEMA_COMPILE_FAILED",
            Self::Validation { .. } => "SCHEMA_VALIDATION_FAILED",
            Self::Json(_) => "SCHEMA_INVALID_JSON",
        }
    }
}

/// Errors from envelope encryption and decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided key material is malformed.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// The byte stream does not begin with a well-formed envelope header.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// The envelope version is not supported.
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u32),
    /// No header packet could be opened with the available secret key.
    #[error("no header packet matches the supplied key")]
    NoMatchingKey,
    /// AEAD encryption or decryption failed.
    #[error("authenticated cipher operation failed")]
    Aead,
    /// An I/O error occurred while streaming.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "CRYPTO_INVALID_KEY",
            Self::InvalidHeader(_) => "CRYPTO_INVALID_HEADER",
            Self::UnsupportedVersion(_) => "CRYPTO_UNSUPPORTED_VERSION",
            Self::NoMatchingKey => "CRYPTO_NO_MATCHING_KEY",
            Self::Aead => "CRYPTO_AEAD_FAILED",
            Self::Io(_) => "CRYPTO_IO_ERROR",
        }
    }
}

/// Errors from the header rewrap call.
#[derive(Debug, Error)]
pub enum RewrapError {
    /// The client configuration is unusable (bad certificate paths, etc.).
    #[error("rewrap configuration error: {0}")]
    Config(String),
    /// The call did not complete within the configured deadline.
    #[error("rewrap call timed out")]
    Timeout,
    /// Transport-level failure reaching the rewrap service.
    #[error("rewrap transport error: {0}")]
    Transport(String),
    /// The rewrap service answered with a non-success status.
    #[error("rewrap service returned status {0}")]
    Status(u16),
    /// The response body could not be decoded.
    #[error("rewrap response decode error: {0}")]
    Decode(String),
}

impl ErrorCode for RewrapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "REWRAP_CONFIG_ERROR",
            Self::Timeout => "REWRAP_TIMEOUT",
            Self::Transport(_) => "REWRAP_TRANSPORT_ERROR",
            Self::Status(_) => "REWRAP_BAD_STATUS",
            Self::Decode(_) => "REWRAP_DECODE_ERROR",
        }
    }
}
