//! Candidate planning: decides which neighbors of the current position
//! should be fetched, and in what order.
//!
//! For a window of N, offsets `+1..=+N` get priorities `1..=N` and offsets
//! `-1..=-N` get `N+1..=2N`. Lower priority numbers dispatch sooner, so every
//! ahead neighbor goes before every behind neighbor.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::DocumentReference;
use crate::fetch::ReferenceFilter;

/// Snapshot of the ordered reference list the user is browsing.
///
/// Slots may be empty (records without an attachment). Equality is structural,
/// which is what context-switch detection compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceList(Arc<[Option<DocumentReference>]>);

impl ReferenceList {
    /// Build a list from raw strings; blank entries become empty slots.
    pub fn from_raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .map(|s| DocumentReference::parse(s.as_ref()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DocumentReference> {
        self.0.get(index).and_then(Option::as_ref)
    }

    pub fn contains(&self, key: &DocumentReference) -> bool {
        self.0.iter().flatten().any(|r| r == key)
    }
}

impl Default for ReferenceList {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl FromIterator<Option<DocumentReference>> for ReferenceList {
    fn from_iter<T: IntoIterator<Item = Option<DocumentReference>>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One neighbor scheduled for prefetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchTask {
    pub key: DocumentReference,
    /// 1 is the most urgent.
    pub priority: u32,
    /// Signed distance from the current position.
    pub offset: isize,
}

/// Priority for a signed offset within a window of `window`.
pub fn priority_for_offset(offset: isize, window: usize) -> u32 {
    let distance = u32::try_from(offset.unsigned_abs()).unwrap_or(u32::MAX);
    if offset > 0 {
        distance
    } else {
        u32::try_from(window)
            .unwrap_or(u32::MAX)
            .saturating_add(distance)
    }
}

/// Compute the ordered prefetch candidates around `position`.
///
/// Skips out-of-range indices, empty slots and references the filter rejects.
/// When the same reference sits at two offsets only the most urgent survives.
/// A window wider than the list is treated as the list length.
pub fn plan(
    list: &ReferenceList,
    position: usize,
    window: usize,
    filter: &dyn ReferenceFilter,
) -> Vec<PrefetchTask> {
    let window = window.min(list.len());
    let mut tasks = Vec::with_capacity(window.saturating_mul(2));
    if window == 0 {
        return tasks;
    }

    let ahead = 1..=window as isize;
    let behind = (1..=window as isize).map(|d| -d);

    for offset in ahead.chain(behind) {
        let Some(index) = position.checked_add_signed(offset) else {
            continue;
        };
        let Some(key) = list.get(index) else {
            continue;
        };
        if !filter.is_prefetchable(key) {
            continue;
        }
        tasks.push(PrefetchTask {
            key: key.clone(),
            priority: priority_for_offset(offset, window),
            offset,
        });
    }

    tasks.sort_by_key(|t| t.priority);

    let mut seen = HashSet::with_capacity(tasks.len());
    tasks.retain(|t| seen.insert(t.key.clone()));
    tasks
}
