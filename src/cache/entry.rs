//! Cache key and entry types.
//!
//! A [`DocumentReference`] is the opaque locator of a remote document and
//! doubles as the cache key. A [`CacheEntry`] is a blob plus the wall-clock
//! time of its most recent successful write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Opaque remote document locator. Compared by exact value after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentReference(String);

impl DocumentReference {
    /// Build a reference from raw input. Returns `None` for empty or
    /// whitespace-only input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A cached document blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: DocumentReference,
    pub blob: Bytes,
    /// Milliseconds since the UNIX epoch of the most recent successful write.
    pub stored_at: u64,
}

impl CacheEntry {
    pub fn new(key: DocumentReference, blob: Bytes, stored_at: u64) -> Self {
        Self {
            key,
            blob,
            stored_at,
        }
    }

    /// Age of the entry at `now_ms`. Entries stamped in the future have age 0.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.stored_at)
    }
}

/// Source of wall-clock time for entry timestamps.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> u64;
}

/// Clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock, for exercising expiry.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
