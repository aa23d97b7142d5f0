//! Worker pool
//!
//! Download tasks are executed by background processes (`web2mp3 daemon`),
//! coordinated only through the filesystem:
//!
//! - the [`TaskIndex`] holds the Pending tasks
//! - the [`LockDir`] holds one `daemon-<n>.lock` per running worker and one
//!   `task-<uri>.lock` per task being executed
//!
//! The [`Coordinator`] decides how many processes to start; each process
//! claims a slot and runs a [`Worker`] loop over a [`TaskExecutor`].

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::TaskIndex;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

pub mod executor;
pub mod locks;
pub mod worker;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod testing;

pub use executor::TaskExecutor;
pub use locks::{LockDir, LockInfo, LockKind, SlotGuard, SlotMode, TaskLock};
pub use worker::{Worker, WorkerOptions, WorkerReport};

/// When to start worker processes while resolving references
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum InitDaemons {
    /// After each resolved reference
    #[default]
    During,
    /// Once the whole batch is resolved
    After,
    /// Never
    Not,
}

/// Starts background worker processes
#[derive(Clone, Debug)]
pub struct Coordinator {
    index: TaskIndex,
    locks: LockDir,
    max_daemons: usize,
    program: PathBuf,
    args: Vec<OsString>,
}

impl Coordinator {
    /// Create a coordinator launching `program <args> daemon --max-daemons <n>`
    pub fn new(
        config: &Config,
        index: TaskIndex,
        locks: LockDir,
        program: PathBuf,
        args: Vec<OsString>,
    ) -> Self {
        Self {
            index,
            locks,
            max_daemons: config.daemon.max_daemons,
            program,
            args,
        }
    }

    /// Number of processes worth starting now
    ///
    /// `min(free slots, pending tasks nobody is executing)`.
    pub async fn daemons_to_start(&self) -> Result<usize> {
        let running = self.locks.slot_count().await?;
        let free = self.max_daemons.saturating_sub(running);
        if free == 0 {
            return Ok(0);
        }
        let locked = self.locks.locked_tasks(None).await?;
        let available = self
            .index
            .list_pending()
            .await?
            .iter()
            .filter(|uri| !locked.contains(*uri))
            .count();
        Ok(free.min(available))
    }

    /// Arguments of a spawned worker process
    ///
    /// The pool bound is passed along so children claim slots against the
    /// same limit the coordinator counts with.
    pub fn daemon_args(&self) -> Vec<OsString> {
        let mut args = self.args.clone();
        args.push("daemon".into());
        args.push("--max-daemons".into());
        args.push(self.max_daemons.to_string().into());
        args
    }

    /// Start as many background workers as useful
    ///
    /// Returns the number of processes started.
    ///
    /// # Errors
    ///
    /// Returns an error if a process cannot be spawned.
    pub async fn start_daemons(&self) -> Result<usize> {
        let n = self.daemons_to_start().await?;
        let args = self.daemon_args();
        for _ in 0..n {
            let child = tokio::process::Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| Error::ExternalTool(format!("Failed to start daemon process: {}", e)))?;
            tracing::debug!(pid = ?child.id(), "Daemon process started");
        }
        if n > 0 {
            tracing::info!(started = n, max = self.max_daemons, "Daemons started");
        }
        Ok(n)
    }
}
