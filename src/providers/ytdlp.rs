//! yt-dlp process runner
//!
//! Wraps the external `yt-dlp` binary for metadata lookups (single videos,
//! searches, playlists) and audio extraction. Output parsing and failure
//! classification are plain functions so they can be tested without the binary.

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Video metadata as reported by `yt-dlp --dump-json`
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct VideoInfo {
    /// Video id
    pub id: String,
    /// Video title
    #[serde(default)]
    pub title: Option<String>,
    /// Channel name
    #[serde(default)]
    pub channel: Option<String>,
    /// Uploader name, used when `channel` is absent
    #[serde(default)]
    pub uploader: Option<String>,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,
}

impl VideoInfo {
    /// Channel name, falling back to the uploader
    pub fn channel_name(&self) -> Option<&str> {
        self.channel
            .as_deref()
            .or(self.uploader.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// Runner for the external `yt-dlp` binary
///
/// # Examples
///
/// ```no_run
/// use web2mp3::providers::YtDlp;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ytdlp = YtDlp::from_path().expect("yt-dlp not found in PATH");
/// let info = ytdlp.video("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await?;
/// println!("{:?}", info.title);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct YtDlp {
    binary_path: PathBuf,
    cookie_file: Option<PathBuf>,
}

impl YtDlp {
    /// Create a runner with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            cookie_file: None,
        }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp").ok().map(Self::new)
    }

    /// Build a runner from the download settings
    ///
    /// # Errors
    ///
    /// [`Error::ExternalTool`] if no binary is configured and none is found in PATH.
    pub fn from_config(config: &DownloadConfig) -> Result<Self> {
        let runner = match &config.ytdlp_path {
            Some(path) => Self::new(path.clone()),
            None => Self::from_path().ok_or_else(|| {
                Error::ExternalTool("yt-dlp not found in PATH".to_string())
            })?,
        };
        Ok(runner.with_cookie_file(config.cookie_file.clone()))
    }

    /// Pass a cookie file to every invocation
    #[must_use]
    pub fn with_cookie_file(mut self, cookie_file: Option<PathBuf>) -> Self {
        self.cookie_file = cookie_file;
        self
    }

    /// Path of the binary
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Metadata of a single video
    pub async fn video(&self, url: &str) -> Result<VideoInfo> {
        let stdout = self
            .run(
                &["--dump-json", "--no-playlist", "--skip-download", url],
                url,
            )
            .await?;
        parse_video_info(&stdout)
    }

    /// Search results for free text
    pub async fn search(&self, text: &str, limit: usize) -> Result<Vec<VideoInfo>> {
        let target = format!("ytsearch{limit}:{text}");
        let stdout = self
            .run(&["--dump-json", "--flat-playlist", &target], text)
            .await?;
        parse_json_lines(&stdout)
    }

    /// Entries of a playlist
    pub async fn playlist(&self, url: &str) -> Result<Vec<VideoInfo>> {
        let stdout = self
            .run(&["--dump-json", "--flat-playlist", url], url)
            .await?;
        parse_json_lines(&stdout)
    }

    /// Download the best audio stream and convert it to MP3
    ///
    /// # Arguments
    ///
    /// * `url` - Video URL
    /// * `destination` - Final `.mp3` path
    /// * `quality` - Target bitrate in kbit/s
    pub async fn extract_audio(&self, url: &str, destination: &Path, quality: u32) -> Result<()> {
        // yt-dlp appends the extension itself
        let template = format!("{}.%(ext)s", destination.with_extension("").display());
        let quality = format!("{quality}K");
        self.run(
            &[
                "--format",
                "bestaudio/best",
                "--extract-audio",
                "--audio-format",
                "mp3",
                "--audio-quality",
                &quality,
                "--no-playlist",
                "--output",
                &template,
                url,
            ],
            url,
        )
        .await?;
        Ok(())
    }

    async fn run(&self, args: &[&str], subject: &str) -> Result<Vec<u8>> {
        let mut command = Command::new(&self.binary_path);
        command.arg("--no-warnings");
        if let Some(cookie_file) = &self.cookie_file {
            if cookie_file.is_file() {
                command.arg("--cookies").arg(cookie_file);
            } else {
                tracing::warn!(path = %cookie_file.display(), "Cookie file does not exist, ignored");
            }
        }
        command.args(args).kill_on_drop(true);

        tracing::debug!(binary = %self.binary_path.display(), ?args, "Running yt-dlp");
        let output = command
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e)))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if self.cookie_file.is_none() && stderr.contains("Sign in") {
                tracing::warn!("No cookie file configured, restricted videos will fail");
            }
            Err(classify_failure(&stderr, subject))
        }
    }
}

/// Parse one `--dump-json` document
pub fn parse_video_info(stdout: &[u8]) -> Result<VideoInfo> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| Error::ExternalTool("yt-dlp produced no output".to_string()))?;
    Ok(serde_json::from_str(line)?)
}

/// Parse newline-delimited `--dump-json` documents, skipping entries without an id
pub fn parse_json_lines(stdout: &[u8]) -> Result<Vec<VideoInfo>> {
    let text = String::from_utf8_lossy(stdout);
    let mut entries = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let info: VideoInfo = serde_json::from_str(line)?;
        if !info.id.is_empty() {
            entries.push(info);
        }
    }
    Ok(entries)
}

/// Map yt-dlp's stderr to an error class
pub fn classify_failure(stderr: &str, subject: &str) -> Error {
    let lower = stderr.to_lowercase();
    if lower.contains("http error 429") || lower.contains("too many requests") {
        Error::RateLimited {
            provider: "youtube".to_string(),
            retry_after: None,
        }
    } else if lower.contains("timed out") {
        Error::Timeout(format!("yt-dlp: {subject}"))
    } else if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("does not exist")
        || lower.contains("http error 404")
    {
        Error::NotFound(subject.to_string())
    } else {
        let last = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("unknown failure");
        Error::ExternalTool(format!("yt-dlp failed for {subject}: {}", last.trim()))
    }
}
