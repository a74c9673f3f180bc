//! Durable on-disk [`BlobStore`] backend.
//!
//! One record file per document, under a two-level directory layout keyed
//! by the SHA-256 of the reference:
//! `<dir>/ab/ab12…ef.doc`. Writes go to a temporary sibling and are renamed
//! into place so a reader never observes a partial record.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::compressor::{self, Compressor, RecordHeader, HEADER_LEN};
use crate::cache::{BlobStore, CacheEntry, CacheError, DocumentReference, RecordStamp};
use crate::config::CacheConfig;

const RECORD_EXT: &str = "doc";

/// Disk backend statistics.
#[derive(Debug, Default)]
pub struct DiskStats {
    pub total_writes: AtomicU64,
    pub total_reads: AtomicU64,
    pub total_bytes_written: AtomicU64,
    pub total_bytes_read: AtomicU64,
}

pub struct DiskStore {
    dir: PathBuf,
    compressor: Compressor,
    stats: DiskStats,
    /// Serializes renames into place against conditional removes.
    publish: Mutex<()>,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `config.dir`.
    pub async fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.dir)
            .await
            .map_err(|e| CacheError::Unavailable(format!("{}: {e}", config.dir.display())))?;

        Ok(Self {
            dir: config.dir.clone(),
            compressor: Compressor::new(config),
            stats: DiskStats::default(),
            publish: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &DocumentReference) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_str().as_bytes()));
        self.dir
            .join(&digest[..2])
            .join(format!("{digest}.{RECORD_EXT}"))
    }

    async fn read_record(&self, path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_read
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        self.compressor
            .decode(&data)
            .map(Some)
            .map_err(|e| CacheError::Corrupt {
                key: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Read only the fixed prefix and key of a record file.
    async fn read_header(&self, path: &Path) -> Result<Option<RecordHeader>, CacheError> {
        let mut file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| CacheError::Corrupt {
            key: path.display().to_string(),
            reason,
        };

        let mut buf = vec![0u8; HEADER_LEN];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| corrupt(format!("header: {e}")))?;
        let key_len = compressor::key_len(&buf).map_err(|e| corrupt(e.to_string()))?;

        buf.resize(HEADER_LEN + key_len, 0);
        file.read_exact(&mut buf[HEADER_LEN..])
            .await
            .map_err(|e| corrupt(format!("key: {e}")))?;

        compressor::decode_header(&buf)
            .map(Some)
            .map_err(|e| corrupt(e.to_string()))
    }

    async fn discard(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete cache file"),
        }
    }

    pub fn stats(&self) -> &DiskStats {
        &self.stats
    }

    /// Total bytes of record files on disk.
    pub async fn disk_usage(&self) -> Result<u64, CacheError> {
        let mut total = 0u64;
        for path in self.record_files().await? {
            total += fs::metadata(&path).await?.len();
        }
        Ok(total)
    }

    async fn record_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        let mut shards = fs::read_dir(&self.dir).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXT) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl BlobStore for DiskStore {
    async fn load(&self, key: &DocumentReference) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.record_path(key);
        let Some(entry) = self.read_record(&path).await? else {
            return Ok(None);
        };

        // Digest collision or a hand-edited file.
        if &entry.key != key {
            return Err(CacheError::Corrupt {
                key: key.to_string(),
                reason: format!("record holds key {}", entry.key),
            });
        }

        debug!(key = %key, path = %path.display(), size = entry.blob.len(), "Read record from disk");
        Ok(Some(entry))
    }

    async fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let path = self.record_path(&entry.key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let data = self.compressor.encode(&entry)?;
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, &data).await?;
        let renamed = {
            let _publish = self.publish.lock().await;
            fs::rename(&tmp, &path).await
        };
        if let Err(e) = renamed {
            self.discard(&tmp).await;
            return Err(e.into());
        }

        debug!(
            key = %entry.key,
            path = %path.display(),
            size = data.len(),
            "Wrote record to disk"
        );

        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn remove(&self, key: &DocumentReference) -> Result<(), CacheError> {
        let path = self.record_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, path = %path.display(), "Deleted record file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_if(&self, key: &DocumentReference, stored_at: u64) -> Result<bool, CacheError> {
        let path = self.record_path(key);
        let _publish = self.publish.lock().await;
        match self.read_header(&path).await? {
            Some(header) if header.key == *key && header.stored_at == stored_at => {
                self.remove(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let _publish = self.publish.lock().await;
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn index(&self) -> Result<Vec<RecordStamp>, CacheError> {
        let mut stamps = Vec::new();
        for path in self.record_files().await? {
            match self.read_header(&path).await {
                Ok(Some(header)) => stamps.push(RecordStamp {
                    key: header.key,
                    stored_at: header.stored_at,
                }),
                Ok(None) => {}
                Err(CacheError::Corrupt { reason, .. }) => {
                    warn!(path = %path.display(), reason = %reason, "Removing unreadable record");
                    self.discard(&path).await;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(stamps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn config(tmp: &TempDir, compress: bool) -> CacheConfig {
        CacheConfig {
            dir: tmp.path().join("docs"),
            compress,
            ..CacheConfig::default()
        }
    }

    fn key(s: &str) -> DocumentReference {
        DocumentReference::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read_record() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::open(&config(&tmp, true)).await.unwrap();

        let entry = CacheEntry::new(key("https://h/a.pdf"), Bytes::from(vec![42u8; 4096]), 99);
        store.store(entry.clone()).await.unwrap();

        assert_eq!(store.load(&key("https://h/a.pdf")).await.unwrap(), Some(entry));
        assert!(store.load(&key("https://h/b.pdf")).await.unwrap().is_none());
        assert_eq!(store.stats().total_writes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::open(&config(&tmp, false)).await.unwrap();

        for name in ["a", "b", "c"] {
            let entry = CacheEntry::new(key(name), Bytes::from_static(b"x"), 1);
            store.store(entry).await.unwrap();
        }
        store.remove(&key("a")).await.unwrap();
        store.remove(&key("a")).await.unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![key("b"), key("c")]);

        store.clear().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
        assert_eq!(store.disk_usage().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_if_spares_newer_write() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::open(&config(&tmp, true)).await.unwrap();
        let k = key("https://h/a.pdf");

        store
            .store(CacheEntry::new(k.clone(), Bytes::from_static(b"old"), 10))
            .await
            .unwrap();
        store
            .store(CacheEntry::new(k.clone(), Bytes::from_static(b"new"), 20))
            .await
            .unwrap();

        assert!(!store.remove_if(&k, 10).await.unwrap());
        assert_eq!(store.load(&k).await.unwrap().unwrap().blob, Bytes::from_static(b"new"));
        assert!(store.remove_if(&k, 20).await.unwrap());
        assert!(store.load(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_index_reads_headers_only() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::open(&config(&tmp, false)).await.unwrap();

        store
            .store(CacheEntry::new(key("a"), Bytes::from(vec![1u8; 1 << 20]), 7))
            .await
            .unwrap();
        let reads = store.stats().total_bytes_read.load(Ordering::Relaxed);

        let stamps = store.index().await.unwrap();
        assert_eq!(
            stamps,
            vec![RecordStamp {
                key: key("a"),
                stored_at: 7
            }]
        );
        assert_eq!(store.stats().total_bytes_read.load(Ordering::Relaxed), reads);
    }

    #[tokio::test]
    async fn test_index_drops_unreadable_record() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::open(&config(&tmp, false)).await.unwrap();

        let path = store.record_path(&key("a"));
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, b"DPC1").await.unwrap();

        assert!(store.index().await.unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_record_reported() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::open(&config(&tmp, false)).await.unwrap();

        let path = store.record_path(&key("a"));
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, b"not a record").await.unwrap();

        assert!(matches!(
            store.load(&key("a")).await,
            Err(CacheError::Corrupt { .. })
        ));
    }
}
