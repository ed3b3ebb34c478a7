//! Blob store contract.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};

/// Opaque media store: bytes in, URL out.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `data` under `key` and return the URL it is served from.
    async fn upload(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String>;

    /// Check the store is reachable.
    async fn check_connectivity(&self) -> StorageResult<()>;
}

/// Blob store held in memory.
pub struct MemoryBlobStore {
    base_url: String,
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Stored bytes and content type for `key`.
    pub async fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(format!("{}/{}", self.base_url.trim_end_matches('/'), key))
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_upload_returns_url() {
        let store = MemoryBlobStore::new("https://cdn.example/");
        let url = store
            .upload(vec![1, 2, 3], "u/s/audio/narration.mp3", "audio/mpeg")
            .await
            .unwrap();

        assert_eq!(url, "https://cdn.example/u/s/audio/narration.mp3");
        let (bytes, content_type) = store.get("u/s/audio/narration.mp3").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(content_type, "audio/mpeg");
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let store = MemoryBlobStore::default();
        assert!(store.upload(vec![], "", "image/png").await.is_err());
        assert!(store.is_empty().await);
    }
}
