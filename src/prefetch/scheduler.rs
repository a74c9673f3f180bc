//! Prefetch scheduler: turns position and list changes into staggered,
//! deduplicated, cancellable background fetches.
//!
//! Per key the lifecycle is `untracked → queued → in-flight → untracked`.
//! Each call to [`PrefetchScheduler::update`] plans candidates synchronously,
//! marks them queued and spawns one pass task. The pass checks the cache,
//! waits out each candidate's stagger delay, re-validates it against the live
//! context and hands it to a detached fetch task.
//!
//! A list change (or teardown) aborts every pass task, so staggered work that
//! has not fired yet never dispatches. Fetches already issued run to completion
//! and still write their result into the cache.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::{DocumentCache, DocumentReference};
use crate::config::PrefetchConfig;
use crate::fetch::{CredentialSource, DocumentFetcher, ReferenceFilter};
use crate::prefetch::planner::{self, PrefetchTask, ReferenceList};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("prefetch scheduler must be created inside a tokio runtime")]
    NoRuntime,
}

/// Scheduler counters.
#[derive(Debug, Default)]
struct PrefetchStats {
    scheduled: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped_cached: AtomicU64,
    discarded_stale: AtomicU64,
    cache_errors: AtomicU64,
}

/// Point-in-time copy of the scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchStatsSnapshot {
    pub scheduled: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped_cached: u64,
    pub discarded_stale: u64,
    pub cache_errors: u64,
}

impl PrefetchStats {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PrefetchStatsSnapshot {
        PrefetchStatsSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped_cached: self.skipped_cached.load(Ordering::Relaxed),
            discarded_stale: self.discarded_stale.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
        }
    }
}

/// Per-session tracking, owned by one scheduler.
#[derive(Debug)]
struct SchedulerState {
    enabled: bool,
    /// Bumped on every context switch and teardown.
    generation: u64,
    snapshot: Option<ReferenceList>,
    queued: HashSet<DocumentReference>,
    in_flight: HashSet<DocumentReference>,
    /// Pass tasks whose stagger timers may still be pending.
    timers: Vec<JoinHandle<()>>,
    /// Issued fetches from any generation that have not resolved.
    outstanding: usize,
}

impl SchedulerState {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            generation: 0,
            snapshot: None,
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            timers: Vec::new(),
            outstanding: 0,
        }
    }

    /// Cancel pending timers and forget all tracking. Returns how many queued
    /// keys were discarded.
    fn reset(&mut self, snapshot: Option<ReferenceList>) -> usize {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        let discarded = self.queued.len();
        self.queued.clear();
        self.in_flight.clear();
        self.snapshot = snapshot;
        self.generation += 1;
        discarded
    }

    fn is_current(&self, generation: u64) -> bool {
        self.enabled && self.generation == generation
    }

    fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.outstanding == 0
    }
}

struct Shared {
    session: Uuid,
    config: PrefetchConfig,
    dispatch_timeout: Duration,
    cache: Arc<DocumentCache>,
    fetcher: Arc<dyn DocumentFetcher>,
    credentials: Arc<dyn CredentialSource>,
    filter: Arc<dyn ReferenceFilter>,
    state: Mutex<SchedulerState>,
    stats: PrefetchStats,
    changed: Notify,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop a queued key that will not be dispatched by this pass.
    fn release_queued(&self, generation: u64, key: &DocumentReference) {
        let mut state = self.lock_state();
        if state.generation == generation {
            state.queued.remove(key);
        }
        drop(state);
        self.changed.notify_waiters();
    }

    /// Move a key from queued to in-flight if its context is still live.
    fn begin_dispatch(&self, generation: u64, key: &DocumentReference) -> bool {
        let mut state = self.lock_state();
        let live = state.is_current(generation)
            && state.snapshot.as_ref().is_some_and(|list| list.contains(key));
        if state.generation == generation {
            state.queued.remove(key);
        }
        if live {
            state.in_flight.insert(key.clone());
            state.outstanding += 1;
        }
        drop(state);
        self.changed.notify_waiters();
        live
    }

    fn finish_dispatch(&self, generation: u64, key: &DocumentReference) {
        let mut state = self.lock_state();
        // A newer context may track the same key; leave its marker alone.
        if state.generation == generation {
            state.in_flight.remove(key);
        }
        state.outstanding = state.outstanding.saturating_sub(1);
        drop(state);
        self.changed.notify_waiters();
    }
}

/// One browsing session's prefetcher.
///
/// The cache is shared; everything else is private to the session. Dropping
/// the scheduler cancels its pending timers.
pub struct PrefetchScheduler {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl PrefetchScheduler {
    pub fn new(
        cache: Arc<DocumentCache>,
        fetcher: Arc<dyn DocumentFetcher>,
        credentials: Arc<dyn CredentialSource>,
        filter: Arc<dyn ReferenceFilter>,
        config: PrefetchConfig,
    ) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let session = Uuid::new_v4();

        info!(
            session = %session,
            window = config.window,
            stagger_ms = config.stagger_ms,
            enabled = config.enabled,
            "Prefetch session created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                session,
                dispatch_timeout: config.dispatch_timeout(),
                state: Mutex::new(SchedulerState::new(config.enabled)),
                config,
                cache,
                fetcher,
                credentials,
                filter,
                stats: PrefetchStats::default(),
                changed: Notify::new(),
            }),
            runtime,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.session
    }

    /// React to a new position and/or reference list.
    ///
    /// Returns immediately; cache checks and fetches run in the background.
    /// Safe to call from outside the runtime.
    pub fn update(&self, list: ReferenceList, position: usize) {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        if !state.enabled {
            debug!(session = %shared.session, "Prefetch disabled, ignoring update");
            return;
        }

        if state.snapshot.as_ref() != Some(&list) {
            let had_context = state.snapshot.is_some();
            let discarded = state.reset(Some(list.clone()));
            PrefetchStats::add(&shared.stats.discarded_stale, discarded as u64);
            if had_context {
                info!(
                    session = %shared.session,
                    generation = state.generation,
                    discarded,
                    len = list.len(),
                    "Reference list changed, pending prefetches cancelled"
                );
            }
            shared.changed.notify_waiters();
        }
        state.timers.retain(|timer| !timer.is_finished());

        let tasks: Vec<PrefetchTask> =
            planner::plan(&list, position, shared.config.window, &*shared.filter)
                .into_iter()
                .filter(|t| !state.queued.contains(&t.key) && !state.in_flight.contains(&t.key))
                .collect();
        if tasks.is_empty() {
            return;
        }

        for task in &tasks {
            state.queued.insert(task.key.clone());
        }
        PrefetchStats::add(&shared.stats.scheduled, tasks.len() as u64);
        debug!(
            session = %shared.session,
            position,
            candidates = tasks.len(),
            "Prefetch pass scheduled"
        );

        let span = info_span!("prefetch_pass", session = %shared.session, generation = state.generation);
        let pass = run_pass(shared.clone(), state.generation, Instant::now(), tasks);
        let timer = self.runtime.spawn(pass.instrument(span));
        state.timers.push(timer);
    }

    /// Enable or disable prefetching. Disabling tears the session down.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.shared.lock_state();
        if state.enabled == enabled {
            return;
        }
        state.enabled = enabled;
        if !enabled {
            let discarded = state.reset(None);
            PrefetchStats::add(&self.shared.stats.discarded_stale, discarded as u64);
            info!(session = %self.shared.session, discarded, "Prefetch disabled");
        } else {
            info!(session = %self.shared.session, "Prefetch enabled");
        }
        drop(state);
        self.shared.changed.notify_waiters();
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.lock_state().enabled
    }

    /// Cancel all pending timers and stop accepting updates.
    pub fn shutdown(&self) {
        self.set_enabled(false);
    }

    pub fn is_queued(&self, key: &DocumentReference) -> bool {
        self.shared.lock_state().queued.contains(key)
    }

    pub fn is_in_flight(&self, key: &DocumentReference) -> bool {
        self.shared.lock_state().in_flight.contains(key)
    }

    /// Wait until nothing is queued and no issued fetch is outstanding.
    pub async fn idle(&self) {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let idle = self.shared.lock_state().is_idle();
            if idle {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> PrefetchStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        let mut state = self.shared.lock_state();
        state.enabled = false;
        state.reset(None);
        debug!(session = %self.shared.session, "Prefetch session torn down");
    }
}

/// Cache-check, stagger and dispatch one planned batch.
async fn run_pass(shared: Arc<Shared>, generation: u64, start: Instant, tasks: Vec<PrefetchTask>) {
    let stagger = shared.config.stagger();
    let mut slot: u32 = 0;

    for task in tasks {
        match shared.cache.get(&task.key).await {
            Ok(Some(_)) => {
                debug!(key = %task.key, "Already cached, skipping");
                PrefetchStats::add(&shared.stats.skipped_cached, 1);
                shared.release_queued(generation, &task.key);
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                // Degrade to a miss.
                warn!(key = %task.key, error = %e, "Cache lookup failed");
                PrefetchStats::add(&shared.stats.cache_errors, 1);
            }
        }

        let delay = stagger.saturating_mul(slot);
        slot = slot.saturating_add(1);
        debug!(
            key = %task.key,
            priority = task.priority,
            offset = task.offset,
            delay_ms = delay.as_millis() as u64,
            "Prefetch staggered"
        );
        match start.checked_add(delay) {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            // Unreachable deadline; parked until the pass is cancelled.
            None => std::future::pending::<()>().await,
        }

        if !shared.begin_dispatch(generation, &task.key) {
            debug!(key = %task.key, "Stale prefetch discarded");
            PrefetchStats::add(&shared.stats.discarded_stale, 1);
            continue;
        }

        let span = info_span!("prefetch_fetch", key = %task.key);
        tokio::spawn(dispatch(shared.clone(), generation, task).instrument(span));
    }
}

/// Fetch one document and write it into the cache. Never fails outward.
async fn dispatch(shared: Arc<Shared>, generation: u64, task: PrefetchTask) {
    PrefetchStats::add(&shared.stats.dispatched, 1);
    debug!(priority = task.priority, offset = task.offset, "Dispatching prefetch");

    let fetch = async {
        let credential = shared.credentials.token().await;
        shared.fetcher.fetch(&task.key, &credential).await
    };

    match tokio::time::timeout(shared.dispatch_timeout, fetch).await {
        Ok(Ok(blob)) => {
            let size = blob.len();
            if let Err(e) = shared.cache.set(&task.key, blob).await {
                warn!(error = %e, "Cache write failed, prefetched document dropped");
                PrefetchStats::add(&shared.stats.cache_errors, 1);
            }
            PrefetchStats::add(&shared.stats.completed, 1);
            debug!(size, "Prefetch complete");
        }
        Ok(Err(e)) => {
            warn!(status = ?e.status(), error = %e, "Prefetch failed");
            PrefetchStats::add(&shared.stats.failed, 1);
        }
        Err(_) => {
            warn!(timeout_ms = shared.dispatch_timeout.as_millis() as u64, "Prefetch timed out");
            PrefetchStats::add(&shared.stats.failed, 1);
        }
    }

    shared.finish_dispatch(generation, &task.key);
}
