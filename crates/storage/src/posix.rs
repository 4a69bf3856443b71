// Path: crates/storage/src/posix.rs
//! Posix directory backend.
//!
//! Object names are resolved under a root directory. Writers stream into a
//! hidden `.part` sibling and rename it over the target on shutdown, so no
//! partially written object ever becomes visible under its final name.

use arca_api::storage::{FileWriter, StorageBackend, StorageError};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};

/// Backend rooted at a directory on a posix filesystem.
pub struct PosixBackend {
    root: PathBuf,
}

impl PosixBackend {
    /// Creates a backend over `root`. The directory must already exist.
    pub fn new(root: &Path) -> Self {
        PosixBackend {
            root: root.to_path_buf(),
        }
    }

    /// Resolves an object name under the root, rejecting traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path.trim_start_matches('/'));
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidPath(path.to_owned()));
                }
            }
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl StorageBackend for PosixBackend {
    async fn new_file_reader(
        &self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, StorageError> {
        let file = fs::File::open(self.resolve(path)?).await?;
        Ok(Box::new(file))
    }

    async fn new_file_writer(&self, path: &str) -> Result<Box<dyn FileWriter>, StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staging = match target.file_name().and_then(|n| n.to_str()) {
            Some(name) => target.with_file_name(format!(".{name}.part")),
            None => return Err(StorageError::InvalidPath(path.to_owned())),
        };
        let file = fs::File::create(&staging).await?;
        Ok(Box::new(PosixWriter {
            file,
            staging,
            target,
            committed: false,
        }))
    }

    async fn get_file_size(&self, path: &str) -> Result<u64, StorageError> {
        let meta = fs::metadata(self.resolve(path)?).await?;
        Ok(meta.len())
    }
}

/// A writer that renames its staging file over the target on shutdown.
struct PosixWriter {
    file: tokio::fs::File,
    staging: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl AsyncWrite for PosixWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if self.committed {
            return Poll::Ready(Ok(()));
        }
        match Pin::new(&mut self.file).poll_shutdown(cx) {
            Poll::Ready(Ok(())) => {
                // The rename is the commit point.
                std::fs::rename(&self.staging, &self.target)?;
                self.committed = true;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl Drop for PosixWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.staging);
        }
    }
}
