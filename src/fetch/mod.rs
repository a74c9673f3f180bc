//! Retrieval of document bytes from the remote content-fetch service.
//!
//! - [`http`]: reqwest client for the fetch endpoint
//! - [`filter`]: Which references are worth prefetching at all
//!
//! A fetcher never touches the cache; writing results is the scheduler's job.

pub mod filter;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::cache::DocumentReference;

pub use self::filter::{HostAllowList, ReferenceFilter};
pub use self::http::HttpFetcher;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("not a fetchable document reference: {0}")]
    InvalidReference(String),

    #[error("invalid fetch configuration: {0}")]
    Config(String),
}

impl FetchError {
    /// HTTP status of the failed response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Fetches the raw bytes of one document.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// `credential` is an opaque bearer token; empty means unauthenticated.
    async fn fetch(&self, key: &DocumentReference, credential: &str) -> Result<Bytes, FetchError>;
}

/// Supplies the current session's bearer token. Queried once per dispatch.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn token(&self) -> String;
}

/// A fixed credential.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(pub String);

#[async_trait]
impl CredentialSource for StaticCredential {
    async fn token(&self) -> String {
        self.0.clone()
    }
}
