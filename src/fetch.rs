//! Pull fallback contract.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ChannelError, ChannelResult};

/// Single-shot pull retrieval used while the push transport is down.
///
/// The polling scheduler never invokes a fetcher concurrently with itself.
#[async_trait]
pub trait FallbackFetcher<T>: Send + Sync {
    /// Fetch the current payload once.
    ///
    /// # Errors
    /// Returns [`ChannelError::Fetch`] when retrieval or decoding fails.
    async fn fetch(&self) -> ChannelResult<T>;
}

/// [`FallbackFetcher`] that issues a JSON `GET` against a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpFetcher {
    /// Create a fetcher for `url` with a default client.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Create a fetcher with a caller-supplied client (headers, timeouts).
    #[must_use]
    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send> FallbackFetcher<T> for HttpFetcher {
    async fn fetch(&self) -> ChannelResult<T> {
        debug!(url = %self.url, "Fallback fetch");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ChannelError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Fetch(format!("HTTP {status}: {body}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ChannelError::Fetch(e.to_string()))
    }
}
