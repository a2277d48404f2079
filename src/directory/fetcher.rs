//! Network side of the guard directory.

use crate::error::DirectoryError;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Produces the raw body of a directory listing.
#[async_trait]
pub trait DirectoryFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, DirectoryError>;
}

/// Plain HTTP GET of the onionoo guard listing.
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("guardwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DirectoryError::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DirectoryFetcher for HttpFetcher {
    async fn fetch(&self) -> Result<Bytes, DirectoryError> {
        tracing::debug!("GET {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DirectoryError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| DirectoryError::Fetch(e.to_string()))?;

        response
            .bytes()
            .await
            .map_err(|e| DirectoryError::Fetch(e.to_string()))
    }
}
