// Path: crates/storage/src/lib.rs
#![forbid(unsafe_code)]

//! # ARCA Storage
//!
//! Concrete [`StorageBackend`] implementations for the inbox and the
//! archive: a posix directory backend and an S3-compatible object-store
//! backend. Both commit written objects atomically on writer shutdown and
//! surface backend errors unchanged.

mod posix;
mod s3;

pub use posix::PosixBackend;
pub use s3::S3Backend;

use arca_api::storage::{StorageBackend, StorageError};
use arca_types::config::StorageConfig;
use std::sync::Arc;

/// Builds the backend selected by the configuration section.
pub fn new_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match config {
        StorageConfig::Posix(c) => Ok(Arc::new(PosixBackend::new(&c.root))),
        StorageConfig::S3(c) => Ok(Arc::new(S3Backend::new(c)?)),
    }
}
