// Path: crates/api/src/storage.rs

//! API for streaming byte storage over posix or S3-compatible backends.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Represents errors surfaced by a storage backend. Backend errors pass
/// through unchanged; callers decide whether they are transient.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A generic error originating from the backend (filesystem or object
    /// store).
    #[error("backend error: {0}")]
    Backend(String),
    /// The named object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The object name is not acceptable to the backend.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(e.to_string())
        } else {
            StorageError::Backend(e.to_string())
        }
    }
}

/// A writable stream that commits atomically on shutdown. No partially
/// written object becomes visible under the target name before
/// `shutdown()` returns successfully.
pub trait FileWriter: AsyncWrite + Send + Unpin {}

impl<T: AsyncWrite + Send + Unpin> FileWriter for T {}

/// The primary trait for byte storage used by the inbox and the archive.
///
/// Readers support sequential read through end of object; the size probe is
/// a separate call so callers can decide on requeue semantics independently
/// of open failures.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Opens the named object for sequential reading.
    async fn new_file_reader(
        &self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, StorageError>;

    /// Opens a writer for the named object. The object becomes visible
    /// atomically when the writer is shut down.
    async fn new_file_writer(&self, path: &str) -> Result<Box<dyn FileWriter>, StorageError>;

    /// Returns the size in bytes of the named object.
    async fn get_file_size(&self, path: &str) -> Result<u64, StorageError>;
}
