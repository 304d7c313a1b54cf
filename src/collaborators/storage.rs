//! Archive storage seam and a local-directory implementation.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid remote path '{0}'")]
    InvalidPath(String),

    #[error("storage I/O error for '{path}': {detail}")]
    Io { path: String, detail: String },

    #[error("storage rejected '{path}': {detail}")]
    Rejected { path: String, detail: String },
}

/// Persists artifacts under slash-separated remote paths.
#[async_trait]
pub trait ArchiveStorage: Send + Sync {
    /// Store `bytes` at `remote_path`, creating parent folders as needed and
    /// replacing any existing object.
    async fn upload(&self, bytes: Vec<u8>, remote_path: &str) -> Result<(), StorageError>;

    /// Make an uploaded object publicly reachable. `Ok(None)` when the
    /// backend has no notion of public links.
    async fn publish(&self, remote_path: &str) -> Result<Option<String>, StorageError> {
        let _ = remote_path;
        Ok(None)
    }

    fn name(&self) -> &str {
        "storage"
    }
}

/// Stores artifacts as files under a local root directory.
///
/// Writes go to a temporary file in the destination folder and are renamed
/// into place, so readers never observe a half-written PDF.
#[derive(Debug, Clone)]
pub struct LocalDirStorage {
    root: PathBuf,
}

impl LocalDirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a remote path onto the local root, rejecting traversal.
    pub fn local_path(&self, remote_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(remote_path.trim_start_matches('/'));
        let mut out = self.root.clone();
        let mut parts = 0;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    out.push(part);
                    parts += 1;
                }
                Component::CurDir => {}
                _ => return Err(StorageError::InvalidPath(remote_path.to_string())),
            }
        }
        if parts == 0 {
            return Err(StorageError::InvalidPath(remote_path.to_string()));
        }
        Ok(out)
    }
}

#[async_trait]
impl ArchiveStorage for LocalDirStorage {
    async fn upload(&self, bytes: Vec<u8>, remote_path: &str) -> Result<(), StorageError> {
        let target = self.local_path(remote_path)?;
        let remote = remote_path.to_string();
        let io_err = move |e: std::io::Error| StorageError::Io {
            path: remote.clone(),
            detail: e.to_string(),
        };

        let written = tokio::task::spawn_blocking(move || -> std::io::Result<PathBuf> {
            let parent = target
                .parent()
                .ok_or_else(|| std::io::Error::other("remote path has no parent folder"))?;
            std::fs::create_dir_all(parent)?;
            let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
            tmp.write_all(&bytes)?;
            tmp.flush()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(target)
        })
        .await
        .map_err(|e| StorageError::Io {
            path: remote_path.to_string(),
            detail: format!("write task panicked: {e}"),
        })?
        .map_err(io_err)?;

        debug!("Stored {} → {}", remote_path, written.display());
        Ok(())
    }

    async fn publish(&self, remote_path: &str) -> Result<Option<String>, StorageError> {
        let path = self.local_path(remote_path)?;
        if !path.exists() {
            return Err(StorageError::Rejected {
                path: remote_path.to_string(),
                detail: "not uploaded".to_string(),
            });
        }
        let absolute = std::fs::canonicalize(&path).map_err(|e| StorageError::Io {
            path: remote_path.to_string(),
            detail: e.to_string(),
        })?;
        Ok(Some(format!("file://{}", absolute.display())))
    }

    fn name(&self) -> &str {
        "local-dir"
    }
}
