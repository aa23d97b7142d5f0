//! Provider-scoped call pacing
//!
//! After a provider rate-limits us once, every subsequent call to that
//! provider is spaced by a minimum interval for a decay window, even when no
//! further limits are reported. Outside that window calls pass straight
//! through.
//!
//! One [`Pacer`] is shared (it is cheap to clone) by everything that talks to
//! the same provider within a process.

use crate::config::PacingConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Spacing gate for calls to one provider
#[derive(Clone, Debug)]
pub struct Pacer {
    provider: Arc<str>,
    interval: Duration,
    decay_window: Duration,
    state: Arc<Mutex<PacerState>>,
}

#[derive(Debug, Default)]
struct PacerState {
    /// Pacing is active until this instant
    paced_until: Option<Instant>,
    /// Earliest instant the next paced call may start
    next_call: Option<Instant>,
}

impl Pacer {
    /// Create a pacer for `provider`
    ///
    /// # Examples
    ///
    /// ```
    /// use web2mp3::config::PacingConfig;
    /// use web2mp3::pacing::Pacer;
    ///
    /// let pacer = Pacer::new("spotify", &PacingConfig::default());
    /// assert!(!pacer.is_paced());
    /// ```
    #[must_use]
    pub fn new(provider: &str, config: &PacingConfig) -> Self {
        Self {
            provider: Arc::from(provider),
            interval: config.interval,
            decay_window: config.decay_window,
            state: Arc::new(Mutex::new(PacerState::default())),
        }
    }

    /// Provider this pacer belongs to
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Record a rate-limit response, (re)starting the decay window
    pub fn note_throttled(&self) {
        let until = Instant::now() + self.decay_window;
        let mut state = self.lock_state();
        let already_paced = state.paced_until.is_some_and(|t| t > Instant::now());
        state.paced_until = Some(state.paced_until.map_or(until, |t| t.max(until)));
        drop(state);
        if !already_paced {
            tracing::info!(
                provider = %self.provider,
                interval_ms = self.interval.as_millis() as u64,
                window_secs = self.decay_window.as_secs(),
                "Rate limit observed, pacing subsequent calls"
            );
        }
    }

    /// Whether pacing is currently active
    pub fn is_paced(&self) -> bool {
        self.lock_state()
            .paced_until
            .is_some_and(|t| Instant::now() < t)
    }

    /// Wait until the next call may start
    ///
    /// Returns immediately outside the decay window. Inside it, reserves the
    /// next slot under the lock and sleeps outside of it, so concurrent
    /// callers are spaced one interval apart.
    pub async fn wait_turn(&self) {
        let wait = {
            let mut state = self.lock_state();
            let now = Instant::now();
            match state.paced_until {
                Some(until) if now < until => {
                    let start = state.next_call.map_or(now, |next| next.max(now));
                    state.next_call = Some(start + self.interval);
                    start.saturating_duration_since(now)
                }
                _ => Duration::ZERO,
            }
        };
        if !wait.is_zero() {
            tracing::trace!(provider = %self.provider, wait_ms = wait.as_millis() as u64, "Pacing call");
            tokio::time::sleep(wait).await;
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PacerState> {
        // timestamps stay valid across a poisoning panic
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn pacer() -> Pacer {
        Pacer::new(
            "spotify",
            &PacingConfig {
                interval: Duration::from_millis(400),
                decay_window: Duration::from_secs(300),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn calls_are_not_delayed_before_any_rate_limit() {
        let pacer = pacer();
        let start = Instant::now();
        for _ in 0..5 {
            pacer.wait_turn().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_are_spaced_after_a_rate_limit() {
        let pacer = pacer();
        pacer.note_throttled();
        assert!(pacer.is_paced());

        let start = Instant::now();
        pacer.wait_turn().await;
        pacer.wait_turn().await;
        pacer.wait_turn().await;
        // first call immediate, then two intervals
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(800) && elapsed < Duration::from_millis(810),
            "{elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_expires_after_decay_window() {
        let pacer = pacer();
        pacer.note_throttled();
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!pacer.is_paced());

        let start = Instant::now();
        pacer.wait_turn().await;
        pacer.wait_turn().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_pacing_state() {
        let pacer = pacer();
        let other = pacer.clone();
        other.note_throttled();
        assert!(pacer.is_paced());
        assert_eq!(pacer.provider(), "spotify");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_callers_are_not_delayed_further() {
        let pacer = pacer();
        pacer.note_throttled();
        pacer.wait_turn().await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let start = Instant::now();
        pacer.wait_turn().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
