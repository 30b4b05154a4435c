//! Durable blob storage.
//!
//! Every artifact a request produces (raw source, Markdown, images) goes through
//! a [`BlobStore`]. Keys are built with [`ResourceKey`] and are pure functions of
//! `(source type, category, document id, filename)`: re-processing a document
//! with the same id overwrites rather than duplicates.
//!
//! | Implementation | Use |
//! |----------------|-----|
//! | [`S3Store`]     | Production object storage |
//! | [`FsStore`]     | Local directory mirroring the key layout |
//! | [`MemoryStore`] | Tests and dry runs |
//!
//! Stores are constructed explicitly and passed in. [`BlobStore::initialize`]
//! and [`BlobStore::health_check`] are meant to be called once at start-up.

pub mod fs;
pub mod memory;
pub mod s3;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};

use crate::error::IngestError;
use crate::output::{Category, SourceType, StoredResource};
use async_trait::async_trait;
use std::fmt;

/// Hierarchical storage key: `{source}_sources/{category}/{document_id}/{filename}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub source: SourceType,
    pub category: Category,
    pub document_id: String,
    pub filename: String,
}

impl ResourceKey {
    pub fn new(
        source: SourceType,
        category: Category,
        document_id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            source,
            category,
            document_id: document_id.into(),
            filename: filename.into(),
        }
    }

    pub fn raw(source: SourceType, document_id: &str, filename: &str) -> Self {
        Self::new(source, Category::Raw, document_id, filename)
    }

    pub fn markdown(source: SourceType, document_id: &str, filename: &str) -> Self {
        Self::new(source, Category::ExtractedMarkdown, document_id, filename)
    }

    pub fn image(source: SourceType, document_id: &str, filename: &str) -> Self {
        Self::new(source, Category::ExtractedImages, document_id, filename)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.source.prefix(),
            self.category,
            self.document_id,
            self.filename
        )
    }
}

/// The eight folder placeholders written by [`BlobStore::initialize`].
pub fn folder_keys() -> Vec<String> {
    let mut keys = Vec::with_capacity(8);
    for source in [SourceType::Pdf, SourceType::Web] {
        let prefix = source.prefix();
        keys.push(format!("{prefix}/"));
        for category in Category::ALL {
            keys.push(format!("{prefix}/{category}/"));
        }
    }
    keys
}

/// Content type for an image extension: png/jpeg/jpg map to `image/<ext>`,
/// anything else to `application/octet-stream`.
pub fn image_content_type(extension: &str) -> String {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    match ext.as_str() {
        "png" | "jpeg" | "jpg" => format!("image/{ext}"),
        _ => "application/octet-stream".to_string(),
    }
}

pub const MARKDOWN_CONTENT_TYPE: &str = "text/markdown";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const HTML_CONTENT_TYPE: &str = "text/html";

/// Key-value blob store with URL-returning writes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Write `bytes` at `key` and return the object's canonical URL.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        public: bool,
    ) -> Result<String, IngestError>;

    /// Read the object at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError>;

    /// Verify the store is reachable with the configured credentials.
    async fn health_check(&self) -> Result<(), IngestError>;

    /// Canonical URL of `key`, whether or not it exists yet.
    fn url_for(&self, key: &str) -> String;

    /// Write the folder placeholders of the key layout.
    async fn initialize(&self) -> Result<(), IngestError> {
        for key in folder_keys() {
            self.put(&key, Vec::new(), "application/x-directory", false)
                .await?;
        }
        Ok(())
    }

    /// [`BlobStore::put`] at a typed key, returning the full descriptor.
    async fn store(
        &self,
        key: &ResourceKey,
        bytes: Vec<u8>,
        content_type: &str,
        public: bool,
    ) -> Result<StoredResource, IngestError> {
        let key = key.to_string();
        let url = self.put(&key, bytes, content_type, public).await?;
        Ok(StoredResource {
            key,
            url,
            content_type: content_type.to_string(),
        })
    }
}
