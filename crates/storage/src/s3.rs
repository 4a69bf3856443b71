// Path: crates/storage/src/s3.rs
//! S3-compatible object-store backend.
//!
//! Built on `object_store`: reads stream through a buffered reader sized to
//! the configured chunk size, writes go through a multipart upload that only
//! completes on shutdown, which gives the same no-partial-object guarantee
//! as the posix rename.

use arca_api::storage::{FileWriter, StorageBackend, StorageError};
use arca_types::config::S3Config;
use async_trait::async_trait;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::buffered::{BufReader, BufWriter};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Backend over one bucket of an S3-compatible store.
pub struct S3Backend {
    store: Arc<AmazonS3>,
    chunk_size: usize,
}

impl S3Backend {
    /// Builds the client from the configuration section.
    pub fn new(config: &S3Config) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_allow_http(!config.tls);
        if !config.region.is_empty() {
            builder = builder.with_region(&config.region);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        let store = builder
            .build()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(S3Backend {
            store: Arc::new(store),
            chunk_size: config.chunk_size,
        })
    }

    fn object_path(path: &str) -> Result<ObjectPath, StorageError> {
        ObjectPath::parse(path.trim_start_matches('/'))
            .map_err(|e| StorageError::InvalidPath(e.to_string()))
    }
}

fn map_err(e: object_store::Error) -> StorageError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::NotFound(e.to_string()),
        other => StorageError::Backend(other.to_string()),
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn new_file_reader(
        &self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, StorageError> {
        let location = Self::object_path(path)?;
        let meta = self.store.head(&location).await.map_err(map_err)?;
        let reader = BufReader::with_capacity(
            self.store.clone() as Arc<dyn ObjectStore>,
            &meta,
            self.chunk_size,
        );
        Ok(Box::new(reader))
    }

    async fn new_file_writer(&self, path: &str) -> Result<Box<dyn FileWriter>, StorageError> {
        let location = Self::object_path(path)?;
        let writer = BufWriter::with_capacity(
            self.store.clone() as Arc<dyn ObjectStore>,
            location,
            self.chunk_size,
        );
        Ok(Box::new(writer))
    }

    async fn get_file_size(&self, path: &str) -> Result<u64, StorageError> {
        let location = Self::object_path(path)?;
        let meta = self.store.head(&location).await.map_err(map_err)?;
        Ok(meta.size as u64)
    }
}
