//! doc-prefetch CLI.
//!
//! Drives one prefetch session against the configured fetch service and
//! on-disk cache, and offers basic cache maintenance.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use doc_prefetch::cache::disk::DiskStore;
use doc_prefetch::cache::{DocumentCache, DocumentReference};
use doc_prefetch::config::{Cli, Command, Config};
use doc_prefetch::fetch::{HostAllowList, HttpFetcher, StaticCredential};
use doc_prefetch::prefetch::{PrefetchScheduler, ReferenceList};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "doc_prefetch=debug"
    } else {
        "doc_prefetch=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("doc-prefetch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;

    info!(
        cache_dir = %config.cache.dir.display(),
        ttl_secs = config.cache.ttl_secs,
        window = config.prefetch.window,
        stagger_ms = config.prefetch.stagger_ms,
        "Configuration loaded"
    );

    let store = Arc::new(DiskStore::open(&config.cache).await?);
    let cache = Arc::new(DocumentCache::new(store.clone(), config.cache.ttl()));

    match cli.command {
        Command::Warm {
            list,
            position,
            token,
        } => {
            let raw = tokio::fs::read_to_string(&list)
                .await
                .with_context(|| format!("reading reference list {}", list.display()))?;
            let references = ReferenceList::from_raw(raw.lines());

            let scheduler = PrefetchScheduler::new(
                cache.clone(),
                Arc::new(HttpFetcher::new(&config.fetch)?),
                Arc::new(StaticCredential(token)),
                Arc::new(HostAllowList::from_config(&config.fetch)),
                config.prefetch.clone(),
            )?;

            info!(len = references.len(), position, "Warming neighbors");
            scheduler.update(references, position);
            scheduler.idle().await;

            let stats = scheduler.stats();
            info!(
                scheduled = stats.scheduled,
                completed = stats.completed,
                failed = stats.failed,
                skipped_cached = stats.skipped_cached,
                "Prefetch finished"
            );
        }
        Command::Get { reference, output } => {
            let key = DocumentReference::parse(&reference).context("empty reference")?;
            match cache.get(&key).await? {
                Some(blob) => {
                    info!(key = %key, size = blob.len(), "Cache hit");
                    if let Some(path) = output {
                        tokio::fs::write(&path, &blob).await?;
                        info!(path = %path.display(), "Wrote document");
                    }
                }
                None => info!(key = %key, "Cache miss"),
            }
        }
        Command::Purge => {
            let purged = cache.purge_expired().await?;
            info!(purged, "Purged expired entries");
        }
        Command::Clear => {
            cache.clear().await?;
            info!("Cache cleared");
        }
        Command::Stats => {
            let census = cache.census().await?;
            info!(
                entries = census.entries,
                expired = census.expired,
                ttl_secs = cache.ttl().as_secs(),
                dir = %store.dir().display(),
                "Cache contents"
            );
            let stats = cache.stats();
            info!(
                hits = stats.hits,
                misses = stats.misses,
                errors = stats.errors,
                "Cache counters"
            );
        }
    }

    info!(bytes = store.disk_usage().await?, "Cache disk usage");
    Ok(())
}
