//! Music library layout
//!
//! Downloads are stored as `<music_dir>/<album artist>/<album>/<NN - ><title>.mp3`
//! with the album cover next to them as `folder.jpg`. Path components are
//! stripped of characters that are illegal (or awkward) in file names.

use crate::error::Result;
use crate::types::Tags;
use regex::RegexBuilder;
use std::path::{Path, PathBuf};

/// Characters removed from path components
const ILLEGAL_CHARS: &str = "~.#%&{}[]\\<>*?/$!\":@|`='";

/// Replacement for a component that consisted of illegal characters only
pub const ILLEGAL_ONLY: &str = "ILLEGAL_CHARACTERS_ONLY";

/// File name of the album cover
pub const COVER_FILE_NAME: &str = "folder.jpg";

/// Remove illegal characters from a path component
///
/// Returns [`ILLEGAL_ONLY`] if nothing is left.
///
/// # Examples
///
/// ```
/// use web2mp3::library::rm_char;
///
/// assert_eq!(rm_char("AC/DC"), "ACDC");
/// assert_eq!(rm_char("?"), "ILLEGAL_CHARACTERS_ONLY");
/// ```
pub fn rm_char(text: &str) -> String {
    let cleaned: String = text.chars().filter(|c| !ILLEGAL_CHARS.contains(*c)).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        ILLEGAL_ONLY.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Sanitized `(artist, album, title)` directory and file name components
pub fn path_components(tags: &Tags) -> (String, String, String) {
    let artist = tags
        .album_artist
        .as_deref()
        .or(tags.artist.as_deref())
        .unwrap_or_default();
    (
        rm_char(artist),
        rm_char(tags.album.as_deref().unwrap_or_default()),
        rm_char(tags.title.as_deref().unwrap_or_default()),
    )
}

/// Target files of one download task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackPaths {
    /// Album directory
    pub album_dir: PathBuf,
    /// MP3 file
    pub audio: PathBuf,
    /// Cover image
    pub cover: PathBuf,
}

/// Music library rooted at a directory
#[derive(Clone, Debug)]
pub struct Library {
    music_dir: PathBuf,
}

impl Library {
    /// Library rooted at `music_dir`
    pub fn new(music_dir: impl Into<PathBuf>) -> Self {
        Self {
            music_dir: music_dir.into(),
        }
    }

    /// Library root
    pub fn music_dir(&self) -> &Path {
        &self.music_dir
    }

    /// Where the audio and cover of a task are stored
    pub fn paths_for(&self, tags: &Tags) -> TrackPaths {
        let (artist, album, title) = path_components(tags);
        let album_dir = self.music_dir.join(artist).join(album);
        let file_name = match tags.track_num {
            Some(n) => format!("{n:02} - {title}.mp3"),
            None => format!("{title}.mp3"),
        };
        TrackPaths {
            audio: album_dir.join(file_name),
            cover: album_dir.join(COVER_FILE_NAME),
            album_dir,
        }
    }

    /// MP3 files of `artist` (any album) whose name contains `title`
    ///
    /// Matching is case-insensitive and tolerates whitespace written as
    /// underscores. Track titles are not sanitized here, so
    /// "Song (2018 Remaster)" and "Song" are different files.
    pub async fn track_exists(&self, artist: &str, title: &str) -> Result<Vec<String>> {
        let pattern = regex::escape(title).replace(' ', r"[\s_]*");
        let Ok(pattern) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
            return Ok(Vec::new());
        };

        let artist_dir = self.music_dir.join(artist);
        let mut found = Vec::new();
        let mut albums = match tokio::fs::read_dir(&artist_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        while let Some(album) = albums.next_entry().await? {
            if !album.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(album.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name().to_string_lossy().into_owned();
                let is_mp3 = Path::new(&name)
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"));
                if is_mp3 && pattern.is_match(&name) {
                    found.push(name);
                }
            }
        }

        if !found.is_empty() {
            tracing::info!(artist, title, existing = ?found, "Track already in library");
        }
        Ok(found)
    }

    /// Whether a file for these tags already exists (with `avoid_duplicates`)
    pub async fn file_from_tags_exists(&self, tags: Option<&Tags>, avoid_duplicates: bool) -> Result<bool> {
        let Some(tags) = tags.filter(|_| avoid_duplicates) else {
            return Ok(false);
        };
        let (artist, _, title) = path_components(tags);
        Ok(!self.track_exists(&artist, &title).await?.is_empty())
    }
}
