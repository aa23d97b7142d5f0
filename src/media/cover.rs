//! Cover image download

use super::CoverFetcher;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

const COVER_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Cover fetcher over HTTP
pub struct HttpCoverFetcher {
    client: reqwest::Client,
}

impl HttpCoverFetcher {
    /// Create a fetcher
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(COVER_FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CoverFetcher for HttpCoverFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<()> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("cover image {url}"))
            } else {
                Error::Network(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::Provider {
                provider: "cover".to_string(),
                status: response.status().as_u16(),
                message: format!("failed to fetch cover image {url}"),
            });
        }

        let bytes = response.bytes().await?;
        tokio::fs::write(destination, &bytes).await?;
        tracing::debug!(url, path = %destination.display(), bytes = bytes.len(), "Cover image stored");
        Ok(())
    }
}
