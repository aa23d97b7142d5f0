//! # web2mp3
//!
//! Resolve music links into tagged MP3 downloads.
//!
//! A reference (a Spotify track, album or playlist, or a YouTube video or
//! playlist) is matched against the counterpart platform, recorded as a
//! download task in a file-per-URI [`TaskIndex`], and executed exactly once by
//! a pool of worker processes that coordinate through lock files.
//!
//! ## Pieces
//!
//! - [`index`]: the task index (Unknown / Sentinel / Pending per URI)
//! - [`matching`]: candidate scoring, ranking and the interactive lookup
//! - [`retry`] and [`pacing`]: rate-limit-aware backoff around provider calls
//! - [`providers`]: Spotify and YouTube behind the [`Provider`] trait
//! - [`resolver`]: reference to task pipeline
//! - [`daemon`]: slots, task locks, workers and the process coordinator
//! - [`media`]: audio fetching, tag writing and cover download
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use web2mp3::{Config, ConsoleOperator, ProviderRegistry, Resolver, TaskIndex, YtDlp};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let ytdlp = Arc::new(YtDlp::from_config(&config.download)?);
//!     let registry = ProviderRegistry::with_defaults(&config, ytdlp)?;
//!     let index = TaskIndex::open(&config.paths.index_dir).await?;
//!     let resolver = Resolver::new(&config, registry, index, Arc::new(ConsoleOperator::new()));
//!
//!     for status in resolver
//!         .resolve_all(&["https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC".to_string()])
//!         .await?
//!     {
//!         println!("{status}");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Worker pool: locks, workers and process coordination
pub mod daemon;
/// Error types
pub mod error;
/// File-per-URI task index
pub mod index;
/// Music library layout
pub mod library;
/// Log output setup
pub mod logging;
/// Candidate ranking and matching
pub mod matching;
/// Download collaborators
pub mod media;
/// Provider pacing after rate limits
pub mod pacing;
/// Content providers
pub mod providers;
/// Reference to task pipeline
pub mod resolver;
/// Retry logic with rate-limit-aware backoff
pub mod retry;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use daemon::{Coordinator, InitDaemons, LockDir, SlotMode, TaskExecutor, Worker, WorkerOptions};
pub use error::{Error, Result};
pub use index::TaskIndex;
pub use library::Library;
pub use matching::{ConsoleOperator, LookupOptions, LookupOutcome, Operator, ScriptedOperator, lookup};
pub use media::{AudioFetcher, CoverFetcher, HttpCoverFetcher, LoftyTagWriter, TagWriter, YtDlpFetcher};
pub use providers::{Provider, ProviderRegistry, SpotifyProvider, YouTubeProvider, YtDlp};
pub use resolver::Resolver;
pub use retry::{IsRetryable, call_with_backoff};
pub use types::{SortBy, Status, TaskPayload, TaskSettings, Tags, Uri};

/// Wait for a termination signal.
///
/// Workers race their loop against this future so that their slot and task
/// lock guards are dropped, and their files removed, on SIGTERM or Ctrl+C.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

/// Wait for a termination signal (Ctrl+C).
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
