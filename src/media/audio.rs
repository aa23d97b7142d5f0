//! Audio fetching through yt-dlp

use super::AudioFetcher;
use crate::error::{Error, Result};
use crate::providers::YtDlp;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Audio fetcher extracting MP3 audio with yt-dlp
pub struct YtDlpFetcher {
    ytdlp: Arc<YtDlp>,
}

impl YtDlpFetcher {
    /// Create a fetcher sharing a yt-dlp runner
    pub fn new(ytdlp: Arc<YtDlp>) -> Self {
        Self { ytdlp }
    }
}

#[async_trait]
impl AudioFetcher for YtDlpFetcher {
    async fn fetch(&self, source_url: &str, destination: &Path, quality: u32) -> Result<()> {
        tracing::info!(url = source_url, path = %destination.display(), quality, "Downloading audio");
        self.ytdlp
            .extract_audio(source_url, destination, quality)
            .await?;
        if !tokio::fs::try_exists(destination).await? {
            return Err(Error::ExternalTool(format!(
                "yt-dlp finished but {} was not created",
                destination.display()
            )));
        }
        tracing::info!(path = %destination.display(), "Audio download successful");
        Ok(())
    }
}
