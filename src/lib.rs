//! doc-prefetch: background prefetching of record attachments.
//!
//! While a user views record *i* of an ordered list, the documents attached to
//! records *i±1, i±2, …* are fetched in priority order and persisted to a local
//! cache, so navigating to them is instant:
//!   position change → plan neighbors → skip cached / tracked → staggered fetch → cache write
//!
//! Prefetching is best-effort. Cache and network failures are logged and
//! absorbed; nothing here surfaces an error to the browsing UI.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod prefetch;

pub use cache::{DocumentCache, DocumentReference};
pub use prefetch::{PrefetchScheduler, ReferenceList};
