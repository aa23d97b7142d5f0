use super::*;
use crate::matching::ScriptedOperator;
use crate::providers::testing::{FakeFailure, FakeProvider, candidate};
use crate::types::{EntryState, Tags};
use tempfile::TempDir;

const TRACK_URL: &str = "https://sp.test/T1";

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.paths.music_dir = dir.path().join("music");
    config.paths.relocate(&dir.path().join("data"));
    config
}

fn song_tags() -> Tags {
    Tags {
        title: Some("Song".into()),
        artist: Some("Band".into()),
        album_artist: Some("Band".into()),
        album: Some("Album".into()),
        duration: Some(200.0),
        internet_radio_url: Some("spotify.T1".into()),
        ..Default::default()
    }
}

fn song_query(url: &str) -> Query {
    Query {
        title: "Song".into(),
        artist: "Band".into(),
        album: Some("Album".into()),
        duration: Some(200.0),
        source_url: url.into(),
        tags: Some(song_tags()),
    }
}

async fn resolver_with(
    dir: &TempDir,
    config: &Config,
    tags_source: FakeProvider,
    track_source: FakeProvider,
) -> Resolver {
    let mut registry = ProviderRegistry::new();
    registry
        .register(Arc::new(tags_source))
        .register(Arc::new(track_source));
    let index = TaskIndex::open(dir.path().join("data").join("index"))
        .await
        .unwrap();
    Resolver::new(
        config,
        registry,
        index,
        Arc::new(ScriptedOperator::new(Vec::<String>::new())),
    )
}

fn uri(s: &str) -> Uri {
    Uri::parse(s).unwrap()
}

#[tokio::test]
async fn metadata_reference_becomes_a_pending_audio_task() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source().with_description(TRACK_URL, song_query(TRACK_URL)),
        FakeProvider::track_source()
            .with_results(vec![candidate("ABC", "Song", "Band", Some(201.0))]),
    )
    .await;

    let status = resolver.resolve(TRACK_URL).await.unwrap();
    assert_eq!(
        status,
        Status::Success("Download added. TAG spotify.T1 AUDIO youtube.ABC".into())
    );

    let index = resolver.index();
    let payload = index.read(&uri("youtube.ABC")).await.unwrap().unwrap();
    assert_eq!(payload.tags, Some(song_tags()));
    assert_eq!(payload.settings, Some(config.download.task_settings()));
    assert_eq!(index.state(&uri("spotify.T1")).await.unwrap(), EntryState::Sentinel);
    assert_eq!(index.list_pending().await.unwrap(), vec![uri("youtube.ABC")]);
}

#[tokio::test]
async fn known_sources_are_skipped() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source().with_description(TRACK_URL, song_query(TRACK_URL)),
        FakeProvider::track_source()
            .with_results(vec![candidate("ABC", "Song", "Band", Some(201.0))]),
    )
    .await;

    resolver.resolve(TRACK_URL).await.unwrap();
    let again = resolver.resolve(TRACK_URL).await.unwrap();
    assert_eq!(again, Status::Skipped("TrackExists \"spotify.T1\"".into()));
}

#[tokio::test]
async fn known_track_is_reported_with_every_existing_identity() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let url = "https://sp.test/T2";
    let mut query = song_query(url);
    if let Some(tags) = query.tags.as_mut() {
        tags.internet_radio_url = Some("spotify.T9".into());
    }
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source().with_description(url, query),
        FakeProvider::track_source()
            .with_results(vec![candidate("ABC", "Song", "Band", Some(201.0))]),
    )
    .await;
    resolver.index().mark_seen(&uri("spotify.T9")).await.unwrap();
    resolver.index().mark_seen(&uri("youtube.ABC")).await.unwrap();

    let status = resolver.resolve(url).await.unwrap();
    assert_eq!(status, Status::Skipped("TagExists TrackExists".into()));
    assert!(resolver.index().list_pending().await.unwrap().is_empty());
    assert!(resolver.index().exists(&uri("spotify.T2")).await.unwrap());
}

#[tokio::test]
async fn existing_file_skips_before_searching() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let album = config.paths.music_dir.join("Band").join("Greatest Hits");
    std::fs::create_dir_all(&album).unwrap();
    std::fs::write(album.join("07 - Song.mp3"), b"").unwrap();

    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source().with_description(TRACK_URL, song_query(TRACK_URL)),
        FakeProvider::track_source(),
    )
    .await;

    let status = resolver.resolve(TRACK_URL).await.unwrap();
    assert_eq!(status, Status::Skipped("FileExists".into()));
    assert!(resolver.index().exists(&uri("spotify.T1")).await.unwrap());
}

#[tokio::test]
async fn permanent_failures_write_a_sentinel() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source().failing(TRACK_URL, FakeFailure::NotFound),
        FakeProvider::track_source(),
    )
    .await;

    let status = resolver.resolve(TRACK_URL).await.unwrap();
    assert!(matches!(status, Status::Failed(_)));
    assert_eq!(
        resolver.index().state(&uri("spotify.T1")).await.unwrap(),
        EntryState::Sentinel
    );
}

#[tokio::test]
async fn insufficient_metadata_writes_a_sentinel() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let mut query = song_query(TRACK_URL);
    if let Some(tags) = query.tags.as_mut() {
        tags.album = None;
    }
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source()
            .requiring(&["duration", "title", "album", "artist"])
            .with_description(TRACK_URL, query),
        FakeProvider::track_source(),
    )
    .await;

    let status = resolver.resolve(TRACK_URL).await.unwrap();
    match status {
        Status::Failed(reason) => assert!(reason.contains("album"), "got: {reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(resolver.index().exists(&uri("spotify.T1")).await.unwrap());
}

#[tokio::test]
async fn exhausted_retries_leave_the_reference_unknown() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source().failing(TRACK_URL, FakeFailure::Exhausted),
        FakeProvider::track_source(),
    )
    .await;

    let status = resolver.resolve(TRACK_URL).await.unwrap();
    assert!(matches!(status, Status::Failed(_)));
    assert!(!resolver.index().exists(&uri("spotify.T1")).await.unwrap());
}

#[tokio::test]
async fn storage_failures_are_propagated() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source().failing(TRACK_URL, FakeFailure::Storage),
        FakeProvider::track_source(),
    )
    .await;

    let err = resolver.resolve(TRACK_URL).await.unwrap_err();
    assert!(err.is_storage_failure());
}

#[tokio::test]
async fn unmatched_reference_is_settled_as_seen() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source().with_description(TRACK_URL, song_query(TRACK_URL)),
        FakeProvider::track_source()
            .with_results(vec![candidate("X", "Other", "Someone", Some(90.0))]),
    )
    .await;

    let status = resolver.resolve(TRACK_URL).await.unwrap();
    match status {
        Status::Failed(reason) => assert!(reason.contains("no acceptable match"), "got: {reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(
        resolver.index().state(&uri("spotify.T1")).await.unwrap(),
        EntryState::Sentinel
    );
    assert!(resolver.index().list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn audio_reference_takes_tags_from_the_metadata_provider() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let url = "https://yt.test/VID";
    let query = Query {
        title: "Song - Band".into(),
        artist: String::new(),
        duration: Some(200.0),
        source_url: url.into(),
        ..Default::default()
    };
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source()
            .with_results(vec![candidate("T7", "Song", "Band", Some(199.0))]),
        FakeProvider::track_source().with_description(url, query),
    )
    .await;

    let status = resolver.resolve(url).await.unwrap();
    assert_eq!(
        status,
        Status::Success("Download added. TAG spotify.T7 AUDIO youtube.VID".into())
    );
    let payload = resolver
        .index()
        .read(&uri("youtube.VID"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload.tags.unwrap().album.as_deref(), Some("Song Album"));
    assert!(resolver.index().exists(&uri("spotify.T7")).await.unwrap());
}

#[tokio::test]
async fn batch_items_are_isolated() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let playlist = "https://sp.test/playlist/P1";
    let good = "https://sp.test/T1";
    let bad = "https://sp.test/T2";
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source()
            .with_expansion(playlist, &[bad, good])
            .failing(bad, FakeFailure::Exhausted)
            .with_description(good, song_query(good)),
        FakeProvider::track_source()
            .with_results(vec![candidate("ABC", "Song", "Band", Some(201.0))]),
    )
    .await;

    let statuses = resolver
        .resolve_all(&[playlist.to_string(), "ftp://nowhere".to_string()])
        .await
        .unwrap();
    assert_eq!(statuses.len(), 3);
    assert!(matches!(statuses[0], Status::Failed(_)));
    assert!(statuses[1].is_success());
    match &statuses[2] {
        Status::Failed(reason) => assert!(reason.contains("unknown reference"), "got: {reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_and_tracking_suffixed_references() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let resolver = resolver_with(
        &dir,
        &config,
        FakeProvider::tags_source(),
        FakeProvider::track_source(),
    )
    .await;

    assert!(resolver.expand("").await.unwrap().is_empty());
    assert_eq!(
        resolver.expand("https://sp.test/T1&si=abc").await.unwrap(),
        vec!["https://sp.test/T1".to_string()]
    );
}

#[test]
fn missing_fields_fall_back_to_the_query() {
    let query = Query {
        title: "Song".into(),
        ..Default::default()
    };
    assert_eq!(
        missing_fields(&query, &["title", "artist", "duration"]),
        vec!["artist", "duration"]
    );
}
