//! Worker loop
//!
//! A worker owns one daemon slot and repeatedly:
//!
//! 1. lists task locks, then Pending index entries
//! 2. picks the first entry that is neither locked nor already tried by this worker
//! 3. locks it, executes it, releases the lock
//! 4. sleeps for the task interval
//!
//! until nothing is left (or after one task in single-shot mode). The
//! executor clears a completed entry before its lock is released, so a
//! worker that sees the lock gone also sees the entry done.
//!
//! Cancelling the worker's token interrupts the current task, which stays
//! Pending, and ends the run with both locks released.

use super::executor::TaskExecutor;
use super::locks::{LockDir, SlotGuard};
use crate::config::DaemonConfig;
use crate::error::Result;
use crate::types::{Status, Uri};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Loop parameters
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    /// Sleep between tasks
    pub task_interval: Duration,
    /// Stop after the first executed task
    pub single_shot: bool,
    /// Treat older task locks as absent
    pub stale_lock_ttl: Option<Duration>,
}

impl WorkerOptions {
    /// Options from the daemon configuration
    pub fn from_config(config: &DaemonConfig, single_shot: bool) -> Self {
        Self {
            task_interval: config.task_interval,
            single_shot,
            stale_lock_ttl: config.stale_lock_ttl,
        }
    }
}

/// Outcome of a worker run
#[derive(Clone, Debug, Default)]
pub struct WorkerReport {
    /// Slot the worker ran in
    pub slot: usize,
    /// Executed tasks with their outcome, in order
    pub executed: Vec<(Uri, Status)>,
    /// Whether the worker stopped because no unprocessed task was left
    pub drained: bool,
}

/// One worker bound to a daemon slot
pub struct Worker {
    slot: SlotGuard,
    locks: LockDir,
    executor: TaskExecutor,
    options: WorkerOptions,
    tried: HashSet<Uri>,
    cancel_token: CancellationToken,
}

impl Worker {
    /// Create a worker for a claimed slot
    pub fn new(slot: SlotGuard, locks: LockDir, executor: TaskExecutor, options: WorkerOptions) -> Self {
        Self {
            slot,
            locks,
            executor,
            options,
            tried: HashSet::new(),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Stop the run when `token` is cancelled
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Slot number
    pub fn slot(&self) -> usize {
        self.slot.slot()
    }

    /// Next task to attempt, if any
    async fn next_task(&self) -> Result<Option<Uri>> {
        let locked = self.locks.locked_tasks(self.options.stale_lock_ttl).await?;
        let pending = self.executor.index().list_pending().await?;
        Ok(pending
            .into_iter()
            .find(|uri| !locked.contains(uri) && !self.tried.contains(uri)))
    }

    /// Run until no task is left, then release the slot
    ///
    /// # Errors
    ///
    /// Storage failures end the run; task failures are reported in the
    /// [`WorkerReport`] and leave the task Pending.
    pub async fn run(mut self) -> Result<WorkerReport> {
        let slot = self.slot();
        let mut report = WorkerReport {
            slot,
            ..Default::default()
        };
        tracing::info!(slot, "Worker started");

        loop {
            if self.cancel_token.is_cancelled() {
                tracing::info!(slot, "Worker cancelled");
                break;
            }
            let Some(uri) = self.next_task().await? else {
                tracing::info!(slot, "Worker finished: no unprocessed URIs found");
                report.drained = true;
                break;
            };
            self.tried.insert(uri.clone());

            let mut lock = self.locks.try_lock_task(slot, &uri).await?;
            if lock.is_none()
                && let Some(ttl) = self.options.stale_lock_ttl
            {
                lock = self.locks.take_over_stale(slot, &uri, ttl).await?;
            }
            let Some(lock) = lock else {
                tracing::debug!(slot, uri = %uri, "Task taken by another worker");
                continue;
            };
            let outcome = tokio::select! {
                outcome = self.executor.execute(&uri) => outcome,
                _ = self.cancel_token.cancelled() => {
                    tracing::info!(slot, uri = %uri, "Task interrupted, left pending");
                    lock.release().await?;
                    break;
                }
            };
            lock.release().await?;

            let status = match outcome {
                Ok(status) => status,
                Err(e) if e.is_storage_failure() => return Err(e),
                Err(e) => {
                    tracing::warn!(slot, uri = %uri, error = %e, "Task failed, left pending");
                    Status::Failed(e.to_string())
                }
            };
            tracing::info!(slot, uri = %uri, status = %status, "Task done");
            report.executed.push((uri, status));

            if self.options.single_shot {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.options.task_interval) => {}
                _ = self.cancel_token.cancelled() => {}
            }
        }

        self.slot.release().await?;
        Ok(report)
    }
}
