//! Configuration types for web2mp3
//!
//! A [`Config`] is loaded once at startup (TOML file, then environment
//! overrides) and passed by reference to every component that needs it.

use crate::error::{Error, Result};
use crate::types::{SortBy, TaskSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directory layout (music library, index, locks, logs)
    #[serde(default)]
    pub paths: PathsConfig,

    /// Candidate ranking and acceptance
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Backoff for provider calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Provider pacing after a rate limit
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Worker pool behaviour
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Download settings stored with each task
    #[serde(default)]
    pub download: DownloadConfig,

    /// Spotify API credentials and endpoints
    #[serde(default)]
    pub spotify: SpotifyConfig,
}

/// Directory layout
///
/// The index, lock and log directories live under a common data location
/// (`LOCATION` environment variable, or the platform data directory).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the music library (default: platform audio directory)
    #[serde(default = "default_music_dir")]
    pub music_dir: PathBuf,

    /// Task index directory, one file per URI
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Daemon slot and task lock directory
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,

    /// Log directory for background workers
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            music_dir: default_music_dir(),
            index_dir: default_index_dir(),
            lock_dir: default_lock_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl PathsConfig {
    /// Re-root the index, lock and log directories under `location`
    pub fn relocate(&mut self, location: &Path) {
        self.index_dir = location.join("index");
        self.lock_dir = location.join("locks");
        self.log_dir = location.join("logs");
    }
}

/// Candidate ranking and acceptance settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Ranking key (default: positional)
    #[serde(default)]
    pub sort_by: SortBy,

    /// Maximum relative duration difference for automatic acceptance (default: 0.10)
    #[serde(default = "default_duration_tolerance")]
    pub duration_tolerance: f64,

    /// Candidates requested per search (default: 5)
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Market (region) code used for searches (default: "US")
    #[serde(default = "default_market")]
    pub market: String,

    /// Response used instead of prompting: a 1-based index or "Abort" (headless mode)
    #[serde(default)]
    pub default_response: Option<String>,

    /// Upper bound on Retry/Change-market rounds in one lookup (default: 10)
    #[serde(default = "default_max_prompt_rounds")]
    pub max_prompt_rounds: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            sort_by: SortBy::default(),
            duration_tolerance: default_duration_tolerance(),
            search_limit: default_search_limit(),
            market: default_market(),
            default_response: None,
            max_prompt_rounds: default_max_prompt_rounds(),
        }
    }
}

/// Backoff configuration for provider calls
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per call, including the first (default: 10)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base sleep (default: 2 seconds)
    #[serde(default = "default_base_sleep", with = "duration_serde")]
    pub base_sleep: Duration,

    /// Cap on a single computed sleep (default: 60 seconds)
    #[serde(default = "default_max_sleep", with = "duration_serde")]
    pub max_sleep: Duration,

    /// Add up to one second of random jitter to rate-limit sleeps (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_sleep: default_base_sleep(),
            max_sleep: default_max_sleep(),
            jitter: true,
        }
    }
}

/// Provider pacing after an observed rate limit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Minimum spacing between calls while paced (default: 0.4 seconds)
    #[serde(default = "default_pacing_interval", with = "duration_serde")]
    pub interval: Duration,

    /// How long pacing stays active after the last rate limit (default: 300 seconds)
    #[serde(default = "default_decay_window", with = "duration_serde")]
    pub decay_window: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            interval: default_pacing_interval(),
            decay_window: default_decay_window(),
        }
    }
}

/// Worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Maximum number of worker processes (default: 4)
    #[serde(default = "default_max_daemons")]
    pub max_daemons: usize,

    /// Sleep between tasks inside one worker (default: 2 seconds)
    #[serde(default = "default_task_interval", with = "duration_serde")]
    pub task_interval: Duration,

    /// Treat task locks older than this as absent when picking work (default: never)
    #[serde(default, with = "optional_duration_serde")]
    pub stale_lock_ttl: Option<Duration>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_daemons: default_max_daemons(),
            task_interval: default_task_interval(),
            stale_lock_ttl: None,
        }
    }
}

/// Download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Audio quality in kbit/s (default: 320)
    #[serde(default = "default_quality")]
    pub quality: u32,

    /// Skip when a file with the same title exists for the artist (default: true)
    #[serde(default = "default_true")]
    pub avoid_duplicates: bool,

    /// Re-add known references and replace existing files (default: false)
    #[serde(default)]
    pub overwrite: bool,

    /// Cookie file handed to yt-dlp for restricted content
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,

    /// Path to the yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            avoid_duplicates: true,
            overwrite: false,
            cookie_file: None,
            ytdlp_path: None,
        }
    }
}

impl DownloadConfig {
    /// Settings stored with every queued task
    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            quality: self.quality,
            overwrite: self.overwrite,
            avoid_duplicates: self.avoid_duplicates,
        }
    }
}

/// Spotify API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpotifyConfig {
    /// Client id (`SPOTIPY_CLIENT_ID`)
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (`SPOTIPY_CLIENT_SECRET`)
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Web API base URL
    #[serde(default = "default_spotify_api_base")]
    pub api_base: String,

    /// Token endpoint
    #[serde(default = "default_spotify_auth_url")]
    pub auth_url: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            api_base: default_spotify_api_base(),
            auth_url: default_spotify_auth_url(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and the environment
    ///
    /// With `path = None` the default location
    /// (`<config_dir>/web2mp3/config.toml`) is used; a missing file yields
    /// defaults. Environment overrides are applied afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be parsed or the result
    /// fails validation, and [`Error::Io`] if an existing file cannot be read.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);
        let mut config = match path {
            Some(p) if p.is_file() => {
                let text = std::fs::read_to_string(&p)?;
                tracing::debug!(path = %p.display(), "Loaded configuration file");
                toml::from_str(&text)?
            }
            _ => Config::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `MUSIC_DIR`, `LOCATION`, `SPOTIPY_CLIENT_ID`, `SPOTIPY_CLIENT_SECRET`
    /// and `COOKIE_FILE` overrides using the given lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(dir) = get("MUSIC_DIR") {
            self.paths.music_dir = PathBuf::from(dir);
        }
        if let Some(location) = get("LOCATION") {
            self.paths.relocate(Path::new(&location));
        }
        if let Some(id) = get("SPOTIPY_CLIENT_ID") {
            self.spotify.client_id = Some(id);
        }
        if let Some(secret) = get("SPOTIPY_CLIENT_SECRET") {
            self.spotify.client_secret = Some(secret);
        }
        if let Some(cookie) = get("COOKIE_FILE") {
            self.download.cookie_file = Some(PathBuf::from(cookie));
        }
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| Error::Config {
            message: message.to_string(),
            key: Some(key.to_string()),
        };
        if self.matching.search_limit == 0 {
            return Err(invalid(
                "matching.search_limit",
                "search_limit must be at least 1",
            ));
        }
        if !(self.matching.duration_tolerance.is_finite() && self.matching.duration_tolerance > 0.0)
        {
            return Err(invalid(
                "matching.duration_tolerance",
                "duration_tolerance must be a positive number",
            ));
        }
        if let Some(response) = &self.matching.default_response {
            let is_index = response.parse::<usize>().is_ok_and(|n| n >= 1);
            if !is_index && !response.eq_ignore_ascii_case("abort") {
                return Err(invalid(
                    "matching.default_response",
                    "default_response must be a 1-based index or \"Abort\"",
                ));
            }
        }
        if self.daemon.max_daemons == 0 {
            return Err(invalid("daemon.max_daemons", "max_daemons must be at least 1"));
        }
        if self.retry.max_retries == 0 {
            return Err(invalid("retry.max_retries", "max_retries must be at least 1"));
        }
        Ok(())
    }

    /// Pretty TOML rendering, used by the interactive `Params` command
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })
    }
}

/// Default configuration file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("web2mp3").join("config.toml"))
}

fn default_location() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("web2mp3"))
        .unwrap_or_else(|| PathBuf::from(".web2mp3"))
}

fn default_music_dir() -> PathBuf {
    dirs::audio_dir().unwrap_or_else(|| PathBuf::from("Music"))
}

fn default_index_dir() -> PathBuf {
    default_location().join("index")
}

fn default_lock_dir() -> PathBuf {
    default_location().join("locks")
}

fn default_log_dir() -> PathBuf {
    default_location().join("logs")
}

fn default_true() -> bool {
    true
}

fn default_duration_tolerance() -> f64 {
    0.10
}

fn default_search_limit() -> usize {
    5
}

fn default_market() -> String {
    "US".to_string()
}

fn default_max_prompt_rounds() -> u32 {
    10
}

fn default_max_retries() -> u32 {
    10
}

fn default_base_sleep() -> Duration {
    Duration::from_secs(2)
}

fn default_max_sleep() -> Duration {
    Duration::from_secs(60)
}

fn default_pacing_interval() -> Duration {
    Duration::from_millis(400)
}

fn default_decay_window() -> Duration {
    Duration::from_secs(300)
}

fn default_max_daemons() -> usize {
    4
}

fn default_task_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_quality() -> u32 {
    320
}

fn default_spotify_api_base() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_spotify_auth_url() -> String {
    "https://accounts.spotify.com/api/token".to_string()
}

// Durations are written as (fractional) seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<f64>::deserialize(deserializer)?;
        secs.map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.matching.sort_by, SortBy::Positional);
        assert!((config.matching.duration_tolerance - 0.10).abs() < f64::EPSILON);
        assert_eq!(config.matching.search_limit, 5);
        assert_eq!(config.retry.max_retries, 10);
        assert_eq!(config.retry.base_sleep, Duration::from_secs(2));
        assert_eq!(config.retry.max_sleep, Duration::from_secs(60));
        assert_eq!(config.pacing.interval, Duration::from_millis(400));
        assert_eq!(config.pacing.decay_window, Duration::from_secs(300));
        assert_eq!(config.daemon.max_daemons, 4);
        assert_eq!(config.daemon.stale_lock_ttl, None);
        assert_eq!(config.download.quality, 320);
        assert!(config.download.avoid_duplicates);
        assert!(!config.download.overwrite);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let config: Config = toml::from_str(
            r#"
            [matching]
            sort_by = "combination"
            search_limit = 8

            [pacing]
            interval = 0.25

            [daemon]
            stale_lock_ttl = 3600
            "#,
        )
        .unwrap();
        assert_eq!(config.matching.sort_by, SortBy::Combination);
        assert_eq!(config.matching.search_limit, 8);
        assert_eq!(config.matching.market, "US");
        assert_eq!(config.pacing.interval, Duration::from_millis(250));
        assert_eq!(config.pacing.decay_window, Duration::from_secs(300));
        assert_eq!(config.daemon.stale_lock_ttl, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn negative_durations_are_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[retry]\nbase_sleep = -1.0\n");
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_replace_paths_and_credentials() {
        let env: HashMap<&str, &str> = [
            ("MUSIC_DIR", "/srv/music"),
            ("LOCATION", "/var/lib/web2mp3"),
            ("SPOTIPY_CLIENT_ID", "id"),
            ("SPOTIPY_CLIENT_SECRET", "secret"),
            ("COOKIE_FILE", "/etc/cookies.txt"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.paths.music_dir, PathBuf::from("/srv/music"));
        assert_eq!(config.paths.index_dir, PathBuf::from("/var/lib/web2mp3/index"));
        assert_eq!(config.paths.lock_dir, PathBuf::from("/var/lib/web2mp3/locks"));
        assert_eq!(config.paths.log_dir, PathBuf::from("/var/lib/web2mp3/logs"));
        assert_eq!(config.spotify.client_id.as_deref(), Some("id"));
        assert_eq!(config.spotify.client_secret.as_deref(), Some("secret"));
        assert_eq!(
            config.download.cookie_file,
            Some(PathBuf::from("/etc/cookies.txt"))
        );
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = Config::default();
        let before = config.paths.music_dir.clone();
        config.apply_env_overrides(|k| (k == "MUSIC_DIR").then(|| "  ".to_string()));
        assert_eq!(config.paths.music_dir, before);
    }

    #[test]
    fn validate_names_the_offending_key() {
        let mut config = Config::default();
        config.matching.search_limit = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("matching.search_limit"))
            }
            other => panic!("expected config error, got {other:?}"),
        }

        let mut config = Config::default();
        config.matching.duration_tolerance = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.daemon.max_daemons = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_response_accepts_index_or_abort_only() {
        let mut config = Config::default();
        for ok in ["1", "3", "Abort", "abort"] {
            config.matching.default_response = Some(ok.into());
            assert!(config.validate().is_ok(), "{ok} should be valid");
        }
        for bad in ["0", "Retry", "x"] {
            config.matching.default_response = Some(bad.into());
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[download]\nquality = 192\n[matching]\nmarket = \"NL\"\n",
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.download.quality, 192);
        assert_eq!(config.matching.market, "NL");
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[matching\nsearch_limit = ").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn config_renders_as_toml() {
        let text = Config::default().to_toml().unwrap();
        assert!(text.contains("[matching]"));
        assert!(text.contains("search_limit = 5"));
    }
}
