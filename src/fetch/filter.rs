//! Validity predicate applied before any cache or network work.

use url::Url;

use crate::cache::DocumentReference;
use crate::config::FetchConfig;

/// Decides whether a reference names a remote document worth prefetching.
pub trait ReferenceFilter: Send + Sync {
    fn is_prefetchable(&self, reference: &DocumentReference) -> bool;
}

impl<F> ReferenceFilter for F
where
    F: Fn(&DocumentReference) -> bool + Send + Sync,
{
    fn is_prefetchable(&self, reference: &DocumentReference) -> bool {
        self(reference)
    }
}

/// Accepts `https` URLs whose host is, or is a subdomain of, an allowed host.
#[derive(Debug, Clone)]
pub struct HostAllowList {
    hosts: Vec<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(&config.allowed_hosts)
    }
}

impl ReferenceFilter for HostAllowList {
    fn is_prefetchable(&self, reference: &DocumentReference) -> bool {
        let Ok(url) = Url::parse(reference.as_str()) else {
            return false;
        };
        if url.scheme() != "https" {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        // `Url` already lowercases the host.
        self.hosts.iter().any(|allowed| {
            host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}
