//! Local directory store mirroring the object key layout.
//!
//! `pdf_sources/raw/{id}/a.pdf` lands at `{root}/pdf_sources/raw/{id}/a.pdf`.
//! Returned URLs are `file://` URLs. Useful for running the CLI without cloud
//! credentials.

use super::BlobStore;
use crate::error::IngestError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key onto a path under the root, refusing anything that escapes it.
    fn path_for(&self, key: &str) -> Result<PathBuf, IngestError> {
        let rel = Path::new(key.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(IngestError::StorageWrite {
                key: key.to_string(),
                detail: "key must be a relative path without '..'".into(),
            });
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
        _public: bool,
    ) -> Result<String, IngestError> {
        let write_err = |e: std::io::Error| IngestError::StorageWrite {
            key: key.to_string(),
            detail: e.to_string(),
        };
        let path = self.path_for(key)?;
        if key.ends_with('/') {
            tokio::fs::create_dir_all(&path).await.map_err(write_err)?;
        } else {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
            }
            tokio::fs::write(&path, &bytes).await.map_err(write_err)?;
        }
        debug!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| IngestError::StorageRead {
                key: key.to_string(),
                detail: e.to_string(),
            })
    }

    async fn health_check(&self) -> Result<(), IngestError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| IngestError::StorageWrite {
                key: self.root.display().to_string(),
                detail: e.to_string(),
            })
    }

    fn url_for(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }
}
