//! Error types for web2mp3
//!
//! This module provides the error taxonomy shared by every layer:
//! - Transient provider failures (rate limits, timeouts) that the backoff wrapper retries
//! - Permanent provider answers (not found, insufficient metadata)
//! - Per-item aborts (unknown reference, no acceptable match)
//! - Storage failures, which are always propagated to the caller

use std::time::Duration;
use thiserror::Error;

/// Result type alias for web2mp3 operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for web2mp3
///
/// Each variant carries enough context to produce a one-line status for the
/// reference or task that failed.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "matching.search_limit")
        key: Option<String>,
    },

    /// Provider reported a rate limit (HTTP 429 or equivalent)
    #[error("{provider} rate limit reached")]
    RateLimited {
        /// Provider that throttled the call
        provider: String,
        /// Server-provided `Retry-After` delay, when present
        retry_after: Option<Duration>,
    },

    /// Transport-level timeout
    #[error("timed out: {0}")]
    Timeout(String),

    /// The backoff wrapper gave up on a transient failure
    #[error("retries exhausted after {attempts} attempts calling {operation}: {last_error}")]
    RetriesExhausted {
        /// Name of the wrapped operation
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Display form of the last transient error
        last_error: String,
    },

    /// Provider confirmed the reference is invalid or private
    #[error("not found: {0}")]
    NotFound(String),

    /// Provider response lacks fields required to build a task
    #[error("insufficient metadata for {reference}: missing {missing}")]
    InsufficientMetadata {
        /// Reference (URL or URI) whose metadata is incomplete
        reference: String,
        /// Comma-separated list of missing fields
        missing: String,
    },

    /// Input does not match any registered provider
    #[error("unknown reference: {0}")]
    UnknownReference(String),

    /// Ranking finished without an accepted candidate
    #[error("no acceptable match: {0}")]
    NoAcceptableMatch(String),

    /// A string is not a valid `<provider>.<id>` identifier
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// Provider answered with an unexpected status
    #[error("{provider} returned {status}: {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// HTTP status code
        status: u16,
        /// Response body or summary
        message: String,
    },

    /// I/O error (storage failure)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (yt-dlp)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Writing MP3 tags failed
    #[error("tag write failed: {0}")]
    TagWrite(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is a storage failure that must terminate the current operation
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Whether retrying the same reference later can never succeed
    ///
    /// Permanent failures are recorded as a Sentinel so they are not retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::InsufficientMetadata { .. }
        )
    }

    /// Short machine-readable code used in status lines and logs
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "Config",
            Error::RateLimited { .. } => "RateLimited",
            Error::Timeout(_) => "Timeout",
            Error::RetriesExhausted { .. } => "RetriesExhausted",
            Error::NotFound(_) => "NotFound",
            Error::InsufficientMetadata { .. } => "InsufficientMetadata",
            Error::UnknownReference(_) => "UnknownReference",
            Error::NoAcceptableMatch(_) => "NoAcceptableMatch",
            Error::InvalidUri(_) => "InvalidUri",
            Error::Provider { .. } => "ProviderError",
            Error::Io(_) => "StorageFailure",
            Error::Network(_) => "NetworkError",
            Error::Serialization(_) => "SerializationError",
            Error::ExternalTool(_) => "ExternalToolError",
            Error::TagWrite(_) => "TagWriteError",
            Error::Other(_) => "Error",
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config {
            message: e.to_string(),
            key: None,
        }
    }
}
