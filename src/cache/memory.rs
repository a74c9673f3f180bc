//! In-memory [`BlobStore`] backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cache::{BlobStore, CacheEntry, CacheError, DocumentReference, RecordStamp};

/// Non-durable backend holding entries in a map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<DocumentReference, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn load(&self, key: &DocumentReference) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &DocumentReference) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn remove_if(&self, key: &DocumentReference, stored_at: u64) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.stored_at == stored_at) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn index(&self) -> Result<Vec<RecordStamp>, CacheError> {
        let mut stamps: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| RecordStamp {
                key: e.key.clone(),
                stored_at: e.stored_at,
            })
            .collect();
        stamps.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(stamps)
    }
}
