//! ID3 tag writing with lofty

use super::TagWriter;
use crate::error::{Error, Result};
use crate::types::Tags;
use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::prelude::Accessor;
use lofty::read_from_path;
use lofty::tag::{ItemKey, Tag};
use std::path::{Path, PathBuf};

/// Comment recording where the audio and the metadata came from
pub fn source_comment(tags: &Tags, source_url: &str) -> String {
    format!(
        "Audio Source: \"{}\", Meta Data Source: \"{}\"",
        source_url,
        tags.internet_radio_url.as_deref().unwrap_or_default()
    )
}

/// Tag writer backed by lofty
#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyTagWriter;

impl LoftyTagWriter {
    /// Create a tag writer
    pub fn new() -> Self {
        Self
    }
}

fn apply(tag: &mut Tag, tags: &Tags, source_url: &str) {
    if let Some(title) = &tags.title {
        tag.set_title(title.clone());
    }
    if let Some(artist) = &tags.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(album) = &tags.album {
        tag.set_album(album.clone());
    }
    if let Some(genre) = &tags.genre {
        tag.set_genre(genre.clone());
    }
    if let Some(n) = tags.track_num {
        tag.set_track(n);
    }
    if let Some(n) = tags.track_max {
        tag.set_track_total(n);
    }
    if let Some(n) = tags.disc_num {
        tag.set_disk(n);
    }
    if let Some(n) = tags.disc_max {
        tag.set_disk_total(n);
    }

    let text_items = [
        (ItemKey::AlbumArtist, tags.album_artist.clone()),
        (ItemKey::RecordingDate, tags.recording_date.clone()),
        (ItemKey::ReleaseDate, tags.release_date.clone()),
        (ItemKey::Bpm, tags.bpm.map(|b| b.to_string())),
    ];
    for (key, value) in text_items {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            tag.insert_text(key, value);
        }
    }
    tag.set_comment(source_comment(tags, source_url));
}

fn write_blocking(path: &Path, tags: &Tags, source_url: &str) -> Result<()> {
    let mut tagged_file = read_from_path(path)
        .map_err(|e| Error::TagWrite(format!("failed to read {}: {e}", path.display())))?;
    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| Error::TagWrite(format!("no writable tag available for {tag_type:?}")))?;

    apply(tag, tags, source_url);

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| Error::TagWrite(format!("failed to write {}: {e}", path.display())))
}

#[async_trait]
impl TagWriter for LoftyTagWriter {
    async fn write_tags(&self, tags: &Tags, path: &Path, source_url: &str) -> Result<()> {
        let path_owned: PathBuf = path.to_path_buf();
        let tags_owned = tags.clone();
        let source_owned = source_url.to_string();
        tokio::task::spawn_blocking(move || write_blocking(&path_owned, &tags_owned, &source_owned))
            .await
            .map_err(|e| Error::TagWrite(format!("tag writer task panicked: {e}")))??;
        tracing::info!(path = %path.display(), "Successfully written file meta data");
        Ok(())
    }
}
