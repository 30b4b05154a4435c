//! In-process store for tests and dry runs.

use super::BlobStore;
use crate::error::IngestError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub public: bool,
}

/// [`BlobStore`] holding objects in a map.
///
/// Writes to keys containing any registered failure pattern are rejected with
/// [`IngestError::StorageWrite`], which lets tests exercise partial failures.
#[derive(Debug)]
pub struct MemoryStore {
    base_url: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing: Mutex<Vec<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory://store")
    }
}

impl MemoryStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(Vec::new()),
        }
    }

    /// Reject future writes to keys containing `pattern`.
    pub fn fail_writes_matching(&self, pattern: impl Into<String>) {
        if let Ok(mut f) = self.failing.lock() {
            f.push(pattern.into());
        }
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.object(key).is_some()
    }

    /// Stored text at `key`, if any.
    pub fn text(&self, key: &str) -> Option<String> {
        self.object(key)
            .map(|o| String::from_utf8_lossy(&o.bytes).into_owned())
    }
}

fn poisoned() -> IngestError {
    IngestError::Internal("memory store lock poisoned".into())
}

#[async_trait]
impl BlobStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        public: bool,
    ) -> Result<String, IngestError> {
        let rejected = self
            .failing
            .lock()
            .map_err(|_| poisoned())?
            .iter()
            .any(|p| key.contains(p.as_str()));
        if rejected {
            return Err(IngestError::StorageWrite {
                key: key.to_string(),
                detail: "write rejected".into(),
            });
        }
        self.objects.lock().map_err(|_| poisoned())?.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                public,
            },
        );
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        self.objects
            .lock()
            .map_err(|_| poisoned())?
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| IngestError::StorageRead {
                key: key.to_string(),
                detail: "no such key".into(),
            })
    }

    async fn health_check(&self) -> Result<(), IngestError> {
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}
