//! Execution of one download task

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::index::TaskIndex;
use crate::library::{Library, path_components};
use crate::media::{AudioFetcher, CoverFetcher, TagWriter};
use crate::providers::ProviderRegistry;
use crate::retry::call_with_backoff;
use crate::types::{Status, Uri};
use std::path::Path;
use std::sync::Arc;

/// Downloads, tags and completes Pending tasks
///
/// On success the index entry is cleared to a Sentinel; on failure it stays
/// Pending for a later run.
#[derive(Clone)]
pub struct TaskExecutor {
    index: TaskIndex,
    library: Library,
    registry: ProviderRegistry,
    retry: RetryConfig,
    audio: Arc<dyn AudioFetcher>,
    tags: Arc<dyn TagWriter>,
    cover: Arc<dyn CoverFetcher>,
}

impl TaskExecutor {
    /// Create an executor
    ///
    /// # Arguments
    ///
    /// * `registry` - Maps track URIs back to the URL handed to the audio fetcher
    /// * `retry` - Backoff for the audio fetch
    pub fn new(
        index: TaskIndex,
        library: Library,
        registry: ProviderRegistry,
        retry: RetryConfig,
        audio: Arc<dyn AudioFetcher>,
        tags: Arc<dyn TagWriter>,
        cover: Arc<dyn CoverFetcher>,
    ) -> Self {
        Self {
            index,
            library,
            registry,
            retry,
            audio,
            tags,
            cover,
        }
    }

    /// Task index the executor completes entries in
    pub fn index(&self) -> &TaskIndex {
        &self.index
    }

    /// Execute the task stored under `uri`
    ///
    /// # Errors
    ///
    /// Any failure of a collaborator; the entry is then left Pending.
    pub async fn execute(&self, uri: &Uri) -> Result<Status> {
        let Some(payload) = self.index.read(uri).await? else {
            return Ok(Status::Skipped(format!("\"{uri}\" is no longer pending")));
        };
        let Some(tags) = payload.tags.filter(|t| t.title.is_some()) else {
            tracing::warn!(uri = %uri, "Index entry has no tags, clearing it");
            self.index.clear(uri).await?;
            return Ok(Status::Skipped(format!("\"{uri}\" has no tags to download")));
        };
        let settings = payload.settings.unwrap_or_default();
        tracing::info!(uri = %uri, title = ?tags.title, "Started download task");

        if settings.avoid_duplicates {
            let (artist, _, title) = path_components(&tags);
            if !self.library.track_exists(&artist, &title).await?.is_empty() {
                self.index.clear(uri).await?;
                return Ok(Status::Skipped("FileExists".to_string()));
            }
        }

        let paths = self.library.paths_for(&tags);
        tokio::fs::create_dir_all(&paths.album_dir).await?;
        tracing::info!(
            album_dir = %paths.album_dir.display(),
            cover = %paths.cover.display(),
            audio = %paths.audio.display(),
            "Storage locations"
        );

        match tags.cover.as_deref() {
            None => tracing::warn!(uri = %uri, "No cover URL set"),
            Some(url) => self.store_cover(url, &paths.cover, settings.overwrite).await?,
        }

        let provider = self
            .registry
            .get(uri.provider())
            .ok_or_else(|| Error::UnknownReference(format!("no provider for \"{uri}\"")))?;
        let url = provider.uri_to_url(uri);

        if settings.overwrite && tokio::fs::try_exists(&paths.audio).await? {
            tracing::info!(path = %paths.audio.display(), "File overwritten");
            tokio::fs::remove_file(&paths.audio).await?;
        }

        call_with_backoff(&self.retry, None, "audio fetch", || {
            self.audio.fetch(&url, &paths.audio, settings.quality)
        })
        .await?;

        if !tokio::fs::try_exists(&paths.audio).await? {
            return Err(Error::ExternalTool(format!(
                "no audio file at {}",
                paths.audio.display()
            )));
        }
        self.tags.write_tags(&tags, &paths.audio, &url).await?;

        self.index.clear(uri).await?;
        tracing::info!(uri = %uri, "Download task finished successfully");
        Ok(Status::Success(format!(
            "\"{uri}\" stored at {}",
            paths.audio.display()
        )))
    }

    /// Download the album cover unless one is already stored
    ///
    /// Cover failures are logged and do not fail the task, storage failures excepted.
    async fn store_cover(&self, url: &str, destination: &Path, overwrite: bool) -> Result<()> {
        if tokio::fs::try_exists(destination).await? {
            if !overwrite {
                tracing::debug!(path = %destination.display(), "Cover already present");
                return Ok(());
            }
            tracing::info!(path = %destination.display(), "File overwritten");
            tokio::fs::remove_file(destination).await?;
        }
        match self.cover.fetch(url, destination).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_storage_failure() => Err(e),
            Err(e) => {
                tracing::warn!(url, error = %e, "Cover download failed");
                Ok(())
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::testing::{FakeAudio, FakeCover, FakeTags};
    use crate::providers::testing::FakeProvider;
    use crate::types::{EntryState, TaskSettings, Tags};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Setup {
        _dir: TempDir,
        executor: TaskExecutor,
        audio: Arc<FakeAudio>,
        tags: Arc<FakeTags>,
        cover: Arc<FakeCover>,
        music: std::path::PathBuf,
    }

    async fn setup(audio: FakeAudio) -> Setup {
        let dir = TempDir::new().unwrap();
        let music = dir.path().join("music");
        let index = TaskIndex::open(dir.path().join("index")).await.unwrap();
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeProvider::track_source()));
        let retry = RetryConfig {
            max_retries: 3,
            base_sleep: Duration::from_millis(1),
            max_sleep: Duration::from_millis(5),
            jitter: false,
        };
        let audio = Arc::new(audio);
        let tags = Arc::new(FakeTags::default());
        let cover = Arc::new(FakeCover::default());
        let executor = TaskExecutor::new(
            index,
            Library::new(&music),
            registry,
            retry,
            audio.clone(),
            tags.clone(),
            cover.clone(),
        );
        Setup {
            _dir: dir,
            executor,
            audio,
            tags,
            cover,
            music,
        }
    }

    fn task_tags() -> Tags {
        Tags {
            title: Some("Song".into()),
            artist: Some("Band".into()),
            album_artist: Some("Band".into()),
            album: Some("Album".into()),
            track_num: Some(4),
            cover: Some("https://img.test/cover.jpg".into()),
            internet_radio_url: Some("spotify.T1".into()),
            ..Default::default()
        }
    }

    async fn queue(executor: &TaskExecutor, uri: &Uri, settings: TaskSettings) {
        executor
            .index()
            .write(uri, Some(&task_tags()), Some(&settings), true)
            .await
            .unwrap();
    }

    fn uri() -> Uri {
        Uri::parse("youtube.ABC").unwrap()
    }

    #[tokio::test]
    async fn successful_task_is_stored_tagged_and_cleared() {
        let s = setup(FakeAudio::default()).await;
        queue(&s.executor, &uri(), TaskSettings::default()).await;

        let status = s.executor.execute(&uri()).await.unwrap();
        assert!(status.is_success(), "got {status:?}");

        let audio = s.music.join("Band").join("Album").join("04 - Song.mp3");
        assert!(audio.exists());
        assert!(s.music.join("Band").join("Album").join("folder.jpg").exists());
        assert_eq!(s.audio.calls(), vec!["https://yt.test/ABC".to_string()]);
        assert_eq!(s.tags.written(), vec![(audio, "https://yt.test/ABC".to_string())]);
        assert_eq!(
            s.executor.index().state(&uri()).await.unwrap(),
            EntryState::Sentinel
        );
    }

    #[tokio::test]
    async fn failed_fetch_leaves_the_task_pending() {
        let s = setup(FakeAudio::failing()).await;
        queue(&s.executor, &uri(), TaskSettings::default()).await;

        let err = s.executor.execute(&uri()).await.unwrap_err();
        assert!(matches!(err, Error::ExternalTool(_)));
        assert_eq!(s.audio.calls().len(), 1);
        assert!(s.executor.index().read(&uri()).await.unwrap().is_some());
        assert!(s.tags.written().is_empty());
    }

    #[tokio::test]
    async fn transient_fetch_failures_are_retried() {
        let s = setup(FakeAudio::rate_limited_times(2)).await;
        queue(&s.executor, &uri(), TaskSettings::default()).await;

        let status = s.executor.execute(&uri()).await.unwrap();
        assert!(status.is_success());
        assert_eq!(s.audio.calls().len(), 3);
    }

    #[tokio::test]
    async fn existing_track_is_skipped_and_cleared() {
        let s = setup(FakeAudio::default()).await;
        let other_album = s.music.join("Band").join("Best Of");
        std::fs::create_dir_all(&other_album).unwrap();
        std::fs::write(other_album.join("Song.mp3"), b"").unwrap();
        queue(&s.executor, &uri(), TaskSettings::default()).await;

        let status = s.executor.execute(&uri()).await.unwrap();
        assert_eq!(status, Status::Skipped("FileExists".into()));
        assert!(s.audio.calls().is_empty());
        assert_eq!(
            s.executor.index().state(&uri()).await.unwrap(),
            EntryState::Sentinel
        );
    }

    #[tokio::test]
    async fn existing_cover_is_kept_unless_overwriting() {
        let s = setup(FakeAudio::default()).await;
        let album = s.music.join("Band").join("Album");
        std::fs::create_dir_all(&album).unwrap();
        std::fs::write(album.join("folder.jpg"), b"old").unwrap();
        let settings = TaskSettings {
            avoid_duplicates: false,
            ..Default::default()
        };
        queue(&s.executor, &uri(), settings.clone()).await;
        s.executor.execute(&uri()).await.unwrap();
        assert!(s.cover.calls().is_empty());

        queue(
            &s.executor,
            &uri(),
            TaskSettings {
                overwrite: true,
                ..settings
            },
        )
        .await;
        s.executor.execute(&uri()).await.unwrap();
        assert_eq!(s.cover.calls().len(), 1);
    }

    #[tokio::test]
    async fn damaged_entry_is_cleared_without_downloading() {
        let s = setup(FakeAudio::default()).await;
        std::fs::write(
            s.executor.index().location().join("youtube.ABC"),
            b"not json at all",
        )
        .unwrap();

        let status = s.executor.execute(&uri()).await.unwrap();
        assert!(matches!(status, Status::Skipped(_)), "got {status:?}");
        assert!(s.audio.calls().is_empty());
        assert!(s.tags.written().is_empty());
        assert!(!s.music.exists());
        assert_eq!(
            s.executor.index().state(&uri()).await.unwrap(),
            EntryState::Sentinel
        );
    }

    #[tokio::test]
    async fn settings_without_tags_are_not_downloaded() {
        let s = setup(FakeAudio::default()).await;
        s.executor
            .index()
            .write(&uri(), None, Some(&TaskSettings::default()), true)
            .await
            .unwrap();

        let status = s.executor.execute(&uri()).await.unwrap();
        assert!(matches!(status, Status::Skipped(_)));
        assert!(s.audio.calls().is_empty());
        assert_eq!(
            s.executor.index().state(&uri()).await.unwrap(),
            EntryState::Sentinel
        );
    }

    #[tokio::test]
    async fn sentinel_entries_are_not_executed() {
        let s = setup(FakeAudio::default()).await;
        s.executor.index().mark_seen(&uri()).await.unwrap();
        let status = s.executor.execute(&uri()).await.unwrap();
        assert!(matches!(status, Status::Skipped(_)));
        assert!(s.audio.calls().is_empty());
    }
}
