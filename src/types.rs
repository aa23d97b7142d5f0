//! Core types for web2mp3

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespaced identifier `<provider>.<id>` used as a task index key
///
/// The identifier doubles as a file name in the index and lock directories,
/// so it never contains path separators and never starts with a dot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri(String);

impl Uri {
    /// Build a URI from a provider name and a provider-native id
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] if either part is empty or the result is
    /// not a safe file name.
    pub fn new(provider: &str, id: &str) -> Result<Self> {
        Self::parse(&format!("{provider}.{id}"))
    }

    /// Parse a `<provider>.<id>` string
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] for malformed input.
    pub fn parse(s: &str) -> Result<Self> {
        let Some((provider, id)) = s.split_once('.') else {
            return Err(Error::InvalidUri(s.to_string()));
        };
        let provider_ok = !provider.is_empty()
            && provider
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        let id_ok = !id.is_empty()
            && !id
                .chars()
                .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_whitespace());
        if !provider_ok || !id_ok {
            return Err(Error::InvalidUri(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Provider namespace, e.g. `spotify`
    pub fn provider(&self) -> &str {
        self.0.split_once('.').map(|(p, _)| p).unwrap_or(&self.0)
    }

    /// Provider-native id
    pub fn id(&self) -> &str {
        self.0.split_once('.').map(|(_, id)| id).unwrap_or_default()
    }

    /// String form, usable as a file name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Uri {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.0
    }
}

/// Metadata written into the MP3 file once a task completes
///
/// Every field is optional because manually entered tags are often partial.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tags {
    /// Album name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Primary artist, used as the top-level library directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    /// All artists, `; `-separated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Tempo in beats per minute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<u32>,
    /// Cover image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    /// Number of discs on the album
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disc_max: Option<u32>,
    /// Disc number of this track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disc_num: Option<u32>,
    /// Duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Genres, `; `-separated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// URI of the metadata source (the tags URI), `manual` for operator input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_radio_url: Option<String>,
    /// Album release date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    /// Recording date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_date: Option<String>,
    /// Date the tags were collected (`YYYY-MM-DD`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagging_date: Option<String>,
    /// Track title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Number of tracks on the album
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_max: Option<u32>,
    /// Track number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_num: Option<u32>,
}

impl Tags {
    /// Marker stored in `internet_radio_url` for operator-entered tags
    pub const MANUAL: &'static str = "manual";

    /// Whether no field carries a value
    pub fn is_empty(&self) -> bool {
        *self == Tags::default()
    }

    /// Tags URI of the metadata source, if it is a real provider identity
    pub fn tags_uri(&self) -> Option<Uri> {
        self.internet_radio_url
            .as_deref()
            .filter(|u| *u != Self::MANUAL)
            .and_then(|u| Uri::parse(u).ok())
    }

    /// Names of the listed fields that are missing or empty
    pub fn missing_fields(&self, required: &[&'static str]) -> Vec<&'static str> {
        required
            .iter()
            .copied()
            .filter(|field| match *field {
                "title" => is_blank(&self.title),
                "artist" => is_blank(&self.artist),
                "album" => is_blank(&self.album),
                "album_artist" => is_blank(&self.album_artist),
                "duration" => !self.duration.is_some_and(|d| d > 0.0),
                _ => false,
            })
            .collect()
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Per-task download settings captured when the task is queued
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Audio quality in kbit/s
    pub quality: u32,
    /// Replace existing files
    #[serde(default, alias = "do_overwrite")]
    pub overwrite: bool,
    /// Skip the download when a file with this title already exists for the artist
    #[serde(default = "default_true")]
    pub avoid_duplicates: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            quality: 320,
            overwrite: false,
            avoid_duplicates: true,
        }
    }
}

/// Content of a Pending index entry
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Tags to write into the downloaded file
    #[serde(default)]
    pub tags: Option<Tags>,
    /// Settings for the download
    #[serde(default)]
    pub settings: Option<TaskSettings>,
}

impl TaskPayload {
    /// Whether the payload carries nothing (and would be stored as a Sentinel)
    pub fn is_empty(&self) -> bool {
        self.tags.as_ref().is_none_or(Tags::is_empty) && self.settings.is_none()
    }
}

/// State of a key in the task index
#[derive(Clone, Debug, PartialEq)]
pub enum EntryState {
    /// No file exists
    Unknown,
    /// Empty file: seen, nothing pending
    Sentinel,
    /// File holds a payload awaiting execution
    Pending(TaskPayload),
}

/// Score used to order candidates before the acceptance walk
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Provider's native order
    #[default]
    Positional,
    /// Duration similarity
    Duration,
    /// Title similarity
    Title,
    /// Duration similarity times title similarity
    Combination,
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SortBy::Positional => "positional",
            SortBy::Duration => "duration",
            SortBy::Title => "title",
            SortBy::Combination => "combination",
        };
        f.write_str(s)
    }
}

/// Terminal outcome for one reference or task
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// Task recorded (or executed)
    Success(String),
    /// Nothing to do, with the reason
    Skipped(String),
    /// Item failed, with the reason
    Failed(String),
}

impl Status {
    /// Whether the outcome is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success(msg) => write!(f, "Success: {msg}"),
            Status::Skipped(msg) => write!(f, "Skipped: {msg}"),
            Status::Failed(msg) => write!(f, "Failed: {msg}"),
        }
    }
}
