//! File-per-URI task index
//!
//! Each key of the index is a file named after its [`Uri`] inside one
//! directory. The file encodes one of three states:
//!
//! - no file: [`EntryState::Unknown`]
//! - empty file: [`EntryState::Sentinel`] (seen, nothing pending)
//! - JSON `{tags, settings}`: [`EntryState::Pending`]
//!
//! Payload writes go through a temporary sibling and a rename so readers never
//! observe a half-written file. Files damaged by older writers are salvaged on
//! read: the leading JSON object is kept and the remainder is moved to a
//! dot-prefixed recovery file next to it.
//!
//! Concurrent writers to the same key are not serialized here; the daemon's
//! task locks guarantee a single executor per track URI.

use crate::error::Result;
use crate::types::{EntryState, TaskPayload, TaskSettings, Tags, Uri};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Counts reported by [`TaskIndex::stats`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexStats {
    /// Sentinel entries (seen or completed)
    pub processed: usize,
    /// Pending entries awaiting download
    pub pending: usize,
    /// Index directory
    pub location: PathBuf,
}

/// Persistent task index rooted at a directory
#[derive(Clone, Debug)]
pub struct TaskIndex {
    dir: PathBuf,
}

impl TaskIndex {
    /// Open (and create if needed) the index directory
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::error::Error::Io) if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Index directory
    pub fn location(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, uri: &Uri) -> PathBuf {
        self.dir.join(uri.as_str())
    }

    /// Whether the key exists in any state
    pub async fn exists(&self, uri: &Uri) -> Result<bool> {
        Ok(fs::try_exists(self.path_of(uri)).await?)
    }

    /// Current state of a key
    pub async fn state(&self, uri: &Uri) -> Result<EntryState> {
        let path = self.path_of(uri);
        let content = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(EntryState::Unknown),
            Err(e) => return Err(e.into()),
        };
        if content.is_empty() {
            return Ok(EntryState::Sentinel);
        }
        let text = String::from_utf8_lossy(&content);
        match serde_json::from_str::<TaskPayload>(&text) {
            Ok(payload) => Ok(EntryState::Pending(payload)),
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "Damaged index entry, attempting recovery");
                Ok(EntryState::Pending(self.recover(uri, &text).await?))
            }
        }
    }

    /// Payload of a Pending key; `None` for Unknown and Sentinel keys
    pub async fn read(&self, uri: &Uri) -> Result<Option<TaskPayload>> {
        Ok(match self.state(uri).await? {
            EntryState::Pending(payload) => Some(payload),
            EntryState::Unknown | EntryState::Sentinel => None,
        })
    }

    /// Write a key
    ///
    /// Stores a Pending payload if `tags` (non-empty) or `settings` is given,
    /// otherwise truncates the key to a Sentinel. With `overwrite = false` the
    /// call is a no-op whenever the key already exists, in any state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::error::Error::Io) on storage failures.
    pub async fn write(
        &self,
        uri: &Uri,
        tags: Option<&Tags>,
        settings: Option<&TaskSettings>,
        overwrite: bool,
    ) -> Result<()> {
        let payload = TaskPayload {
            tags: tags.filter(|t| !t.is_empty()).cloned(),
            settings: settings.cloned(),
        };
        let path = self.path_of(uri);

        if payload.is_empty() {
            if overwrite {
                self.replace(&path, b"").await?;
            } else {
                // create_new makes the existence check and the creation one step
                match fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await
                {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
            }
            tracing::debug!(uri = %uri, "Index entry set to sentinel");
            return Ok(());
        }

        if !overwrite && self.exists(uri).await? {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(&payload)?;
        self.replace(&path, &json).await?;
        tracing::debug!(uri = %uri, "Index entry set to pending");
        Ok(())
    }

    /// Register a key as seen without a payload, keeping any existing state
    pub async fn mark_seen(&self, uri: &Uri) -> Result<()> {
        self.write(uri, None, None, false).await
    }

    /// Clear a key to a Sentinel
    pub async fn clear(&self, uri: &Uri) -> Result<()> {
        self.write(uri, None, None, true).await
    }

    /// Delete a key, returning it to Unknown
    ///
    /// Returns `false` if the key did not exist.
    pub async fn remove(&self, uri: &Uri) -> Result<bool> {
        match fs::remove_file(self.path_of(uri)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All Pending keys, sorted
    pub async fn list_pending(&self) -> Result<Vec<Uri>> {
        let mut pending = Vec::new();
        for (uri, len) in self.scan().await? {
            if len > 0 {
                pending.push(uri);
            }
        }
        pending.sort();
        Ok(pending)
    }

    /// Entry counts
    pub async fn stats(&self) -> Result<IndexStats> {
        let entries = self.scan().await?;
        let pending = entries.iter().filter(|(_, len)| *len > 0).count();
        Ok(IndexStats {
            processed: entries.len() - pending,
            pending,
            location: self.dir.clone(),
        })
    }

    /// Keys with their file sizes, skipping temporary and recovery files
    async fn scan(&self) -> Result<Vec<(Uri, u64)>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            match Uri::parse(name) {
                Ok(uri) => entries.push((uri, metadata.len())),
                Err(_) => tracing::debug!(file = name, "Ignoring foreign file in index"),
            }
        }
        Ok(entries)
    }

    /// Atomically replace a file's content
    async fn replace(&self, path: &Path, content: &[u8]) -> Result<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self
            .dir
            .join(format!(".{name}.{}.tmp", std::process::id()));
        fs::write(&tmp, content).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Salvage a damaged entry
    ///
    /// Keeps the leading JSON object (rewriting the entry with it) and moves
    /// the rest into a recovery file. If nothing parses, the whole content is
    /// moved aside and the entry becomes a Sentinel.
    async fn recover(&self, uri: &Uri, content: &str) -> Result<TaskPayload> {
        let (salvaged, remainder) = salvage(content);
        let recovery = unique_recovery_path(&self.dir, uri).await?;
        fs::write(&recovery, remainder.as_bytes()).await?;

        let path = self.path_of(uri);
        match &salvaged {
            Some(payload) => {
                let json = serde_json::to_vec_pretty(payload)?;
                self.replace(&path, &json).await?;
                tracing::warn!(
                    uri = %uri,
                    recovery = %recovery.display(),
                    "Recovered index entry, unparsed data moved aside"
                );
            }
            None => {
                self.replace(&path, b"").await?;
                tracing::warn!(
                    uri = %uri,
                    recovery = %recovery.display(),
                    "Index entry unreadable, content moved aside"
                );
            }
        }
        Ok(salvaged.unwrap_or_default())
    }
}

/// Split content into a leading payload object and the unparsed remainder
pub(crate) fn salvage(content: &str) -> (Option<TaskPayload>, &str) {
    let trimmed = content.trim_start();
    let offset = content.len() - trimmed.len();
    let mut stream = serde_json::Deserializer::from_str(trimmed).into_iter::<serde_json::Value>();
    match stream.next() {
        Some(Ok(value)) if value.is_object() => {
            let end = stream.byte_offset();
            match serde_json::from_value::<TaskPayload>(value) {
                Ok(payload) => (Some(payload), &content[offset + end..]),
                Err(_) => (None, content),
            }
        }
        _ => (None, content),
    }
}

async fn unique_recovery_path(dir: &Path, uri: &Uri) -> Result<PathBuf> {
    let base = format!(".{uri}.recovery");
    let mut candidate = dir.join(&base);
    let mut n = 1u32;
    while fs::try_exists(&candidate).await? {
        n += 1;
        candidate = dir.join(format!("{base}.{n}"));
    }
    Ok(candidate)
}
