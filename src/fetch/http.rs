//! HTTP client for the remote content-fetch service.
//!
//! Request: `POST <endpoint>` with JSON `{ "url": <reference> }` and an
//! `Authorization: Bearer` header when a credential is present.
//! Response: raw document bytes on 2xx, `{ "error": string }` otherwise.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::cache::DocumentReference;
use crate::config::FetchConfig;
use crate::fetch::{DocumentFetcher, FetchError};

#[derive(Debug, Serialize)]
struct FetchRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct HttpFetcher {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| FetchError::Config(format!("endpoint {}: {e}", config.endpoint)))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("doc-prefetch/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()
            .map_err(|e| FetchError::Config(format!("client error: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            timeout: config.timeout(),
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, key: &DocumentReference, credential: &str) -> Result<Bytes, FetchError> {
        Url::parse(key.as_str())
            .map_err(|e| FetchError::InvalidReference(format!("{key}: {e}")))?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&FetchRequest { url: key.as_str() });
        if !credential.is_empty() {
            request = request.bearer_auth(credential);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| {
                    if body.is_empty() {
                        status.canonical_reason().unwrap_or("request failed").to_string()
                    } else {
                        body
                    }
                });
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        debug!(key = %key, size = bytes.len(), status = status.as_u16(), "Fetched document");
        Ok(bytes)
    }
}
