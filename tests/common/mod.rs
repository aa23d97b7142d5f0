//! Shared fixtures for the worker pool integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use web2mp3::config::{PacingConfig, RetryConfig};
use web2mp3::{
    AudioFetcher, CoverFetcher, Library, LockDir, ProviderRegistry, Result, TagWriter,
    TaskExecutor, TaskIndex, TaskSettings, Tags, Uri, YouTubeProvider, YtDlp,
};

/// Audio fetcher that records how many task locks are held while it runs
pub struct ObservingAudio {
    lock_dir: PathBuf,
    delay: Duration,
    max_locked: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl ObservingAudio {
    pub fn new(lock_dir: &Path, delay: Duration) -> Self {
        Self {
            lock_dir: lock_dir.to_path_buf(),
            delay,
            max_locked: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Highest number of task locks seen during any fetch
    pub fn max_locked(&self) -> usize {
        self.max_locked.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn held_task_locks(&self) -> usize {
        std::fs::read_dir(&self.lock_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().starts_with("task-"))
                    .count()
            })
            .unwrap_or(0)
    }

    fn observe(&self) {
        self.max_locked
            .fetch_max(self.held_task_locks(), Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioFetcher for ObservingAudio {
    async fn fetch(&self, source_url: &str, destination: &Path, _quality: u32) -> Result<()> {
        self.calls.lock().unwrap().push(source_url.to_string());
        self.observe();
        tokio::time::sleep(self.delay).await;
        self.observe();
        std::fs::write(destination, b"ID3")?;
        Ok(())
    }
}

pub struct NoopTags;

#[async_trait]
impl TagWriter for NoopTags {
    async fn write_tags(&self, _tags: &Tags, _path: &Path, _source_url: &str) -> Result<()> {
        Ok(())
    }
}

pub struct StubCover;

#[async_trait]
impl CoverFetcher for StubCover {
    async fn fetch(&self, _url: &str, destination: &Path) -> Result<()> {
        std::fs::write(destination, b"jpeg")?;
        Ok(())
    }
}

/// Index and lock directory in a temporary data dir
pub struct Pool {
    pub dir: TempDir,
    pub index: TaskIndex,
    pub locks: LockDir,
}

impl Pool {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let index = TaskIndex::open(dir.path().join("index")).await.unwrap();
        let locks = LockDir::open(dir.path().join("locks")).await.unwrap();
        Self { dir, index, locks }
    }

    pub fn music_dir(&self) -> PathBuf {
        self.dir.path().join("music")
    }

    /// Queue a YouTube download with album metadata
    pub async fn queue(&self, id: &str, track: u32) -> Uri {
        let uri = Uri::new("youtube", id).unwrap();
        let tags = Tags {
            title: Some(format!("Song {id}")),
            artist: Some("Band".into()),
            album_artist: Some("Band".into()),
            album: Some("Album".into()),
            track_num: Some(track),
            cover: Some("https://img.test/cover.jpg".into()),
            ..Default::default()
        };
        self.index
            .write(&uri, Some(&tags), Some(&TaskSettings::default()), true)
            .await
            .unwrap();
        uri
    }

    pub fn executor(&self, audio: Arc<dyn AudioFetcher>) -> TaskExecutor {
        let retry = RetryConfig {
            max_retries: 0,
            ..Default::default()
        };
        // only uri_to_url is used, yt-dlp never runs
        let ytdlp = Arc::new(YtDlp::new(PathBuf::from("/nonexistent/yt-dlp")));
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(YouTubeProvider::new(
            ytdlp,
            retry.clone(),
            &PacingConfig::default(),
        )));
        TaskExecutor::new(
            self.index.clone(),
            Library::new(self.music_dir()),
            registry,
            retry,
            audio,
            Arc::new(NoopTags),
            Arc::new(StubCover),
        )
    }
}
