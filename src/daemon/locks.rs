//! Lock files for daemon slots and running tasks
//!
//! The lock directory holds two kinds of files:
//!
//! - `daemon-<slot>.lock`: a claimed worker slot, containing the owner's pid
//! - `task-<uri>.lock`: a task being executed, containing `<slot> <pid>`
//! - `task-<uri>.takeover`: held only while a stale task lock is replaced
//!
//! All are created with `create_new`, so exactly one process wins a race
//! for the same slot or task. Guards remove their file when dropped; a
//! process that dies without unwinding leaves its files behind until they
//! are reclaimed.

use crate::error::Result;
use crate::types::Uri;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const SLOT_PREFIX: &str = "daemon-";
const TASK_PREFIX: &str = "task-";
const LOCK_SUFFIX: &str = ".lock";
const TAKEOVER_SUFFIX: &str = ".takeover";

/// How many slots may exist at once
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotMode {
    /// At most this many slots
    Bounded(usize),
    /// Always one more (foreground runs)
    Unbounded,
}

/// A claimed daemon slot, released on drop
#[derive(Debug)]
pub struct SlotGuard {
    slot: usize,
    path: PathBuf,
    released: bool,
}

impl SlotGuard {
    /// Slot number
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Remove the slot file
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        remove_if_present(&self.path).await?;
        tracing::debug!(slot = self.slot, "Daemon slot released");
        Ok(())
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// A task lock, released on drop
#[derive(Debug)]
pub struct TaskLock {
    uri: Uri,
    path: PathBuf,
    released: bool,
}

impl TaskLock {
    /// Locked task
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Remove the lock file
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        remove_if_present(&self.path).await?;
        tracing::debug!(uri = %self.uri, "Task lock released");
        Ok(())
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Exclusive right to replace one stale task lock
struct TakeoverGuard {
    path: PathBuf,
}

impl Drop for TakeoverGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// What a lock file represents
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockKind {
    /// Daemon slot
    Slot(usize),
    /// Task lock
    Task(Uri),
    /// Takeover of a stale task lock in progress
    Takeover(Uri),
}

impl LockKind {
    fn order(&self) -> u8 {
        match self {
            LockKind::Slot(_) => 0,
            LockKind::Task(_) => 1,
            LockKind::Takeover(_) => 2,
        }
    }
}

/// One lock file with its owner and age
#[derive(Clone, Debug)]
pub struct LockInfo {
    /// Slot or task
    pub kind: LockKind,
    /// File content (pid, or `<slot> <pid>`)
    pub owner: String,
    /// Time since the file was last modified
    pub age: Duration,
    /// Lock file
    pub path: PathBuf,
}

/// Directory of slot and task lock files
#[derive(Clone, Debug)]
pub struct LockDir {
    dir: PathBuf,
}

impl LockDir {
    /// Open (and create if needed) the lock directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Lock directory
    pub fn location(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("{SLOT_PREFIX}{slot}{LOCK_SUFFIX}"))
    }

    fn task_path(&self, uri: &Uri) -> PathBuf {
        self.dir.join(format!("{TASK_PREFIX}{uri}{LOCK_SUFFIX}"))
    }

    fn takeover_path(&self, uri: &Uri) -> PathBuf {
        self.dir.join(format!("{TASK_PREFIX}{uri}{TAKEOVER_SUFFIX}"))
    }

    /// Claim the lowest free slot
    ///
    /// Returns `None` when a bounded pool is full.
    pub async fn claim_slot(&self, mode: SlotMode) -> Result<Option<SlotGuard>> {
        let pid = std::process::id();
        let mut slot = 0;
        loop {
            if let SlotMode::Bounded(max) = mode
                && slot >= max
            {
                tracing::debug!(max, "All daemon slots are taken");
                return Ok(None);
            }
            let path = self.slot_path(slot);
            if create_exclusive(&path, &pid.to_string()).await? {
                tracing::info!(slot, pid, "Daemon slot claimed");
                return Ok(Some(SlotGuard {
                    slot,
                    path,
                    released: false,
                }));
            }
            slot += 1;
        }
    }

    /// Lock a task for `slot`
    ///
    /// Returns `None` if another worker holds the task.
    pub async fn try_lock_task(&self, slot: usize, uri: &Uri) -> Result<Option<TaskLock>> {
        let path = self.task_path(uri);
        let owner = format!("{slot} {}", std::process::id());
        if !create_exclusive(&path, &owner).await? {
            return Ok(None);
        }
        tracing::debug!(uri = %uri, slot, "Task locked");
        Ok(Some(TaskLock {
            uri: uri.clone(),
            path,
            released: false,
        }))
    }

    /// Replace a task lock that is older than `ttl` with one owned by `slot`
    ///
    /// The age check and removal happen while holding the task's takeover
    /// file, and only a takeover holder removes another worker's lock, so a
    /// lock created by a concurrent takeover is never deleted.
    ///
    /// Returns `None` if the lock is fresh or another worker took it first.
    pub async fn take_over_stale(&self, slot: usize, uri: &Uri, ttl: Duration) -> Result<Option<TaskLock>> {
        let takeover = self.takeover_path(uri);
        let owner = format!("{slot} {}", std::process::id());
        if !create_exclusive(&takeover, &owner).await? {
            tracing::debug!(uri = %uri, slot, "Stale lock takeover already in progress");
            return Ok(None);
        }
        let _guard = TakeoverGuard { path: takeover };

        let path = self.task_path(uri);
        let modified = match fs::metadata(&path).await {
            Ok(m) => m.modified().ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(modified) = modified {
            let age = SystemTime::now().duration_since(modified).unwrap_or_default();
            if !is_stale(age, ttl) {
                return Ok(None);
            }
            tracing::warn!(uri = %uri, slot, age_secs = age.as_secs(), "Taking over stale task lock");
            remove_if_present(&path).await?;
        }
        self.try_lock_task(slot, uri).await
    }

    /// Every lock file: slots, then task locks, then takeovers
    pub async fn list(&self) -> Result<Vec<LockInfo>> {
        let now = SystemTime::now();
        let mut locks = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(kind) = name.to_str().and_then(parse_lock_name) else {
                continue;
            };
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                // released between listing and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            let owner = fs::read_to_string(entry.path())
                .await
                .unwrap_or_default()
                .trim()
                .to_string();
            locks.push(LockInfo {
                kind,
                owner,
                age,
                path: entry.path(),
            });
        }
        locks.sort_by(|a, b| match (&a.kind, &b.kind) {
            (LockKind::Slot(x), LockKind::Slot(y)) => x.cmp(y),
            (LockKind::Task(x), LockKind::Task(y)) | (LockKind::Takeover(x), LockKind::Takeover(y)) => {
                x.cmp(y)
            }
            (x, y) => x.order().cmp(&y.order()),
        });
        Ok(locks)
    }

    /// Number of claimed slots
    pub async fn slot_count(&self) -> Result<usize> {
        Ok(self
            .list()
            .await?
            .iter()
            .filter(|l| matches!(l.kind, LockKind::Slot(_)))
            .count())
    }

    /// URIs with a task lock
    ///
    /// With `stale_after`, locks older than the TTL are treated as absent.
    pub async fn locked_tasks(&self, stale_after: Option<Duration>) -> Result<HashSet<Uri>> {
        let mut locked = HashSet::new();
        for lock in self.list().await? {
            let LockKind::Task(uri) = lock.kind else {
                continue;
            };
            if stale_after.is_some_and(|ttl| is_stale(lock.age, ttl)) {
                tracing::warn!(uri = %uri, age_secs = lock.age.as_secs(), "Ignoring stale task lock");
                continue;
            }
            locked.insert(uri);
        }
        Ok(locked)
    }

    /// Remove lock files, optionally only those older than `older_than`
    ///
    /// This is the manual recovery path for workers that died without
    /// cleaning up. Returns the removed locks.
    pub async fn reclaim(&self, older_than: Option<Duration>) -> Result<Vec<LockInfo>> {
        let mut removed = Vec::new();
        for lock in self.list().await? {
            if older_than.is_some_and(|ttl| !is_stale(lock.age, ttl)) {
                continue;
            }
            remove_if_present(&lock.path).await?;
            tracing::info!(path = %lock.path.display(), owner = %lock.owner, "Lock reclaimed");
            removed.push(lock);
        }
        Ok(removed)
    }
}

/// Whether a lock of this age is past its TTL
pub fn is_stale(age: Duration, ttl: Duration) -> bool {
    age > ttl
}

fn parse_lock_name(name: &str) -> Option<LockKind> {
    if let Some(stem) = name.strip_suffix(TAKEOVER_SUFFIX) {
        let uri = stem.strip_prefix(TASK_PREFIX)?;
        return Uri::parse(uri).ok().map(LockKind::Takeover);
    }
    let stem = name.strip_suffix(LOCK_SUFFIX)?;
    if let Some(slot) = stem.strip_prefix(SLOT_PREFIX) {
        return slot.parse().ok().map(LockKind::Slot);
    }
    let uri = stem.strip_prefix(TASK_PREFIX)?;
    Uri::parse(uri).ok().map(LockKind::Task)
}

/// Create `path` holding `content`; `false` if it already exists
async fn create_exclusive(path: &Path, content: &str) -> Result<bool> {
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let written = match file.write_all(content.as_bytes()).await {
        Ok(()) => file.flush().await,
        Err(e) => Err(e),
    };
    drop(file);
    discard_unwritten(path, written).await?;
    Ok(true)
}

/// Remove a freshly created lock file whose content could not be written
async fn discard_unwritten(path: &Path, written: std::io::Result<()>) -> Result<()> {
    if let Err(e) = written {
        tracing::warn!(path = %path.display(), error = %e, "Could not write lock file, removing it");
        remove_if_present(path).await?;
        return Err(e.into());
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
