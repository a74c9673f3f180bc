//! Runtime configuration for doc-prefetch.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Every prefetch, cache and fetch knob (window, stagger, TTL, timeout) lives here
//! so tests can pass explicit values.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "doc-prefetch", about = "Neighbor-window document prefetcher and cache")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Prefetch the neighbors of one position in a reference list.
    Warm {
        /// File with one document reference per line (blank lines are empty slots).
        #[arg(short, long)]
        list: PathBuf,

        /// Current position in the list.
        #[arg(short, long, default_value_t = 0)]
        position: usize,

        /// Bearer credential attached to fetch calls.
        #[arg(short, long, default_value = "")]
        token: String,
    },

    /// Look up a reference in the cache.
    Get {
        reference: String,

        /// Write the cached blob to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete every expired cache entry.
    Purge,

    /// Delete every cache entry.
    Clear,

    /// Report cache contents and disk usage.
    Stats,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefetch scheduling.
    pub prefetch: PrefetchConfig,

    /// Local cache store.
    pub cache: CacheConfig,

    /// Remote content-fetch service.
    pub fetch: FetchConfig,
}

/// Prefetch scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Neighbors considered on each side of the current position.
    pub window: usize,

    /// Delay between successive dispatches in one pass, in milliseconds.
    pub stagger_ms: u64,

    /// Whether prefetching starts enabled.
    pub enabled: bool,

    /// Upper bound on one dispatch (credential lookup plus fetch), in seconds.
    pub dispatch_timeout_secs: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            window: 2,
            stagger_ms: 500,
            enabled: true,
            dispatch_timeout_secs: 30,
        }
    }
}

impl PrefetchConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

/// Local cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for the on-disk store.
    pub dir: PathBuf,

    /// Entry time-to-live in seconds.
    pub ttl_secs: u64,

    /// Apply zstd compression to stored blobs.
    pub compress: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp/doc-prefetch"),
            ttl_secs: 7 * 24 * 60 * 60, // 7 days
            compress: false,
            zstd_level: 3,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Remote content-fetch service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// URL of the fetch endpoint (receives `POST { "url": ... }`).
    pub endpoint: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Hosts whose documents may be prefetched. Subdomains match too.
    pub allowed_hosts: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/api/fetch-document".to_string(),
            timeout_secs: 30,
            allowed_hosts: vec!["firebasestorage.googleapis.com".to_string()],
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
