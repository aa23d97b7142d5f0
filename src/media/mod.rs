//! Download collaborators
//!
//! Stateless I/O wrappers used by the task executor:
//!
//! - [`AudioFetcher`]: fetch audio from a URL into an MP3 file ([`YtDlpFetcher`])
//! - [`TagWriter`]: write tags into an MP3 file ([`LoftyTagWriter`])
//! - [`CoverFetcher`]: download a cover image ([`HttpCoverFetcher`])
//!
//! The executor wraps audio fetches in the backoff wrapper; the collaborators
//! themselves make a single attempt.

use crate::error::Result;
use crate::types::Tags;
use async_trait::async_trait;
use std::path::Path;

mod audio;
mod cover;
mod tags;

pub use audio::YtDlpFetcher;
pub use cover::HttpCoverFetcher;
pub use tags::{LoftyTagWriter, source_comment};

/// Fetches audio from a source URL
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Download `source_url` as an MP3 file at `destination`
    ///
    /// # Arguments
    ///
    /// * `source_url` - Audio source (e.g. a YouTube watch URL)
    /// * `destination` - Final `.mp3` path
    /// * `quality` - Target bitrate in kbit/s
    async fn fetch(&self, source_url: &str, destination: &Path, quality: u32) -> Result<()>;
}

/// Writes tags into an audio file
#[async_trait]
pub trait TagWriter: Send + Sync {
    /// Write `tags` into `path`, recording `source_url` as the audio source
    async fn write_tags(&self, tags: &Tags, path: &Path, source_url: &str) -> Result<()>;
}

/// Fetches cover images
#[async_trait]
pub trait CoverFetcher: Send + Sync {
    /// Download the image at `url` into `destination`
    async fn fetch(&self, url: &str, destination: &Path) -> Result<()>;
}
