//! Local document cache.
//!
//! This module contains the persistent key-value cache the prefetcher writes into:
//! - [`entry`]: DocumentReference, CacheEntry, Clock
//! - [`memory`]: In-memory backend
//! - [`disk`]: Durable on-disk backend
//! - [`compressor`]: Record encoding and optional zstd compression
//!
//! [`DocumentCache`] layers the time-to-live policy over any [`BlobStore`]
//! backend. Expired entries are deleted lazily on read; [`DocumentCache::purge_expired`]
//! is available as an explicit sweep.

pub mod compressor;
pub mod disk;
pub mod entry;
pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

pub use entry::{CacheEntry, Clock, DocumentReference, ManualClock, SystemClock};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache storage unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache record for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("compression failed: {0}")]
    Compression(#[from] compressor::CompressionError),
}

/// Durable key → entry storage. Implementations must tolerate concurrent
/// calls for unrelated keys; same-key writes are last-writer-wins.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Load the raw entry for `key`, ignoring expiry.
    async fn load(&self, key: &DocumentReference) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert or overwrite an entry.
    async fn store(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Remove an entry. Removing an absent key succeeds.
    async fn remove(&self, key: &DocumentReference) -> Result<(), CacheError>;

    /// Remove the entry for `key` only if it is still the one stamped
    /// `stored_at`. Returns whether a record was removed. Must be atomic with
    /// respect to `store` on the same key.
    async fn remove_if(&self, key: &DocumentReference, stored_at: u64) -> Result<bool, CacheError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Key and write time of every stored entry, without loading blobs.
    async fn index(&self) -> Result<Vec<RecordStamp>, CacheError>;

    /// All keys currently stored.
    async fn keys(&self) -> Result<Vec<DocumentReference>, CacheError> {
        Ok(self.index().await?.into_iter().map(|s| s.key).collect())
    }
}

/// Identity of one stored write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStamp {
    pub key: DocumentReference,
    pub stored_at: u64,
}

/// Cache counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub writes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Stored entries at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCensus {
    pub entries: usize,
    pub expired: usize,
}

/// TTL-bounded document cache, shared process-wide across prefetch sessions.
pub struct DocumentCache {
    backend: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    stats: CacheStats,
}

impl DocumentCache {
    pub fn new(backend: Arc<dyn BlobStore>, ttl: Duration) -> Self {
        Self::with_clock(backend, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<dyn BlobStore>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }

    fn is_fresh(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        entry.age_ms(now_ms) <= self.ttl_ms()
    }

    /// Return the blob for `key` if present and not older than the TTL.
    ///
    /// An expired entry is deleted before reporting the miss. A corrupt record
    /// is deleted as well and reported as a miss.
    pub async fn get(&self, key: &DocumentReference) -> Result<Option<Bytes>, CacheError> {
        let loaded = match self.backend.load(key).await {
            Ok(loaded) => loaded,
            Err(CacheError::Corrupt { reason, .. }) => {
                warn!(key = %key, reason = %reason, "Dropping corrupt cache record");
                CacheStats::bump(&self.stats.errors);
                CacheStats::bump(&self.stats.misses);
                self.backend.remove(key).await?;
                return Ok(None);
            }
            Err(e) => {
                CacheStats::bump(&self.stats.errors);
                return Err(e);
            }
        };

        let Some(entry) = loaded else {
            CacheStats::bump(&self.stats.misses);
            return Ok(None);
        };

        let now = self.clock.now_ms();
        if self.is_fresh(&entry, now) {
            CacheStats::bump(&self.stats.hits);
            debug!(key = %key, age_ms = entry.age_ms(now), "Cache hit");
            return Ok(Some(entry.blob));
        }

        debug!(key = %key, age_ms = entry.age_ms(now), "Cache entry expired");
        CacheStats::bump(&self.stats.misses);
        // A concurrent `set` may have replaced the record since it was loaded.
        match self.backend.remove_if(key, entry.stored_at).await {
            Ok(true) => CacheStats::bump(&self.stats.expired),
            Ok(false) => {}
            Err(e) => {
                CacheStats::bump(&self.stats.errors);
                return Err(e);
            }
        }
        Ok(None)
    }

    /// Insert or overwrite the blob for `key`, stamped with the current time.
    pub async fn set(&self, key: &DocumentReference, blob: Bytes) -> Result<(), CacheError> {
        let entry = CacheEntry::new(key.clone(), blob, self.clock.now_ms());
        match self.backend.store(entry).await {
            Ok(()) => {
                CacheStats::bump(&self.stats.writes);
                Ok(())
            }
            Err(e) => {
                CacheStats::bump(&self.stats.errors);
                Err(e)
            }
        }
    }

    pub async fn delete(&self, key: &DocumentReference) -> Result<(), CacheError> {
        self.backend.remove(key).await.inspect_err(|_| {
            CacheStats::bump(&self.stats.errors);
        })
    }

    /// Remove every entry. Not used on the prefetch path.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.backend.clear().await.inspect_err(|_| {
            CacheStats::bump(&self.stats.errors);
        })
    }

    /// Delete every expired entry. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now_ms();
        let ttl_ms = self.ttl_ms();
        let mut purged = 0;
        for stamp in self.backend.index().await? {
            if now.saturating_sub(stamp.stored_at) <= ttl_ms {
                continue;
            }
            if self.backend.remove_if(&stamp.key, stamp.stored_at).await? {
                CacheStats::bump(&self.stats.expired);
                purged += 1;
            }
        }
        debug!(purged, "Expired entries purged");
        Ok(purged)
    }

    /// Count stored entries by freshness, without loading blobs.
    pub async fn census(&self) -> Result<CacheCensus, CacheError> {
        let now = self.clock.now_ms();
        let ttl_ms = self.ttl_ms();
        let mut census = CacheCensus::default();
        for stamp in self.backend.index().await? {
            census.entries += 1;
            if now.saturating_sub(stamp.stored_at) > ttl_ms {
                census.expired += 1;
            }
        }
        Ok(census)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}
