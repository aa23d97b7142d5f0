//! Rate-limit-aware retry logic
//!
//! Every provider call goes through [`call_with_backoff`]. Transient failures
//! are retried with a delay that depends on their class:
//!
//! - timeouts sleep `min(base * attempt, max)`
//! - rate limits honour the provider's `Retry-After`, otherwise sleep
//!   `min(base * 2^(attempt-1), max)` plus up to one second of jitter
//!
//! When the attempts run out the caller receives
//! [`Error::RetriesExhausted`], never the original transient error, so a
//! task can be left pending for a later run instead of being marked done.
//!
//! # Example
//!
//! ```no_run
//! use web2mp3::config::RetryConfig;
//! use web2mp3::error::Error;
//! use web2mp3::retry::call_with_backoff;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::default();
//! let body = call_with_backoff(&config, None, "spotify track", || async {
//!     Ok::<_, Error>("{}".to_string())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::pacing::Pacer;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Class of a retryable failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transient {
    /// Provider-reported rate limit, with its `Retry-After` if any
    RateLimited {
        /// Server-provided delay
        retry_after: Option<Duration>,
    },
    /// Transport-level timeout or connection failure
    Timeout,
}

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Transient class of this error, or `None` if it is permanent
    fn transient(&self) -> Option<Transient>;

    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool {
        self.transient().is_some()
    }
}

impl IsRetryable for Error {
    fn transient(&self) -> Option<Transient> {
        match self {
            Error::RateLimited { retry_after, .. } => Some(Transient::RateLimited {
                retry_after: *retry_after,
            }),
            Error::Timeout(_) => Some(Transient::Timeout),
            Error::Network(e) if e.is_timeout() || e.is_connect() => Some(Transient::Timeout),
            // Storage failures propagate; everything else is a definite answer
            _ => None,
        }
    }
}

/// Execute a provider call with pacing and backoff
///
/// # Arguments
///
/// * `config` - Attempt count and sleep bounds
/// * `pacer` - Provider pacer; consulted before every attempt and notified on rate limits
/// * `operation` - Name used in logs and in the exhaustion error
/// * `call` - Closure producing the call's future; invoked once per attempt
///
/// # Errors
///
/// Permanent errors are returned unchanged after the first failing attempt.
/// After `config.max_retries` transient failures,
/// [`Error::RetriesExhausted`] is returned.
pub async fn call_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    pacer: Option<&Pacer>,
    operation: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if let Some(pacer) = pacer {
            pacer.wait_turn().await;
        }

        let err = match call().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempts = attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let Some(transient) = err.transient() else {
            return Err(err);
        };

        if matches!(transient, Transient::RateLimited { .. })
            && let Some(pacer) = pacer
        {
            pacer.note_throttled();
        }

        last_error = err.to_string();
        if attempt == max_attempts {
            break;
        }

        let delay = backoff_delay(config, attempt, transient);
        tracing::warn!(
            error = %err,
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }

    tracing::error!(operation, attempts = max_attempts, error = %last_error, "Retries exhausted");
    Err(Error::RetriesExhausted {
        operation: operation.to_string(),
        attempts: max_attempts,
        last_error,
    })
}

/// Delay before the attempt following `attempt` (1-based)
pub fn backoff_delay(config: &RetryConfig, attempt: u32, transient: Transient) -> Duration {
    match transient {
        Transient::Timeout => config
            .base_sleep
            .saturating_mul(attempt)
            .min(config.max_sleep),
        Transient::RateLimited {
            retry_after: Some(delay),
        } => delay,
        Transient::RateLimited { retry_after: None } => {
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
            let delay = config.base_sleep.saturating_mul(factor).min(config.max_sleep);
            if config.jitter {
                delay + jitter()
            } else {
                delay
            }
        }
    }
}

/// Uniform jitter in `[0, 1)` seconds
fn jitter() -> Duration {
    let mut rng = rand::thread_rng();
    Duration::from_secs_f64(rng.gen_range(0.0..1.0))
}

/// Parse a `Retry-After` header value
///
/// Accepts delta-seconds (`"5"`, `"1.5"`) and HTTP dates
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Dates in the past yield zero.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
