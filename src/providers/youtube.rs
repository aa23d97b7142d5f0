//! YouTube provider
//!
//! YouTube references carry audio; their metadata is searched on Spotify.
//! All lookups go through [`YtDlp`].

use super::{AcceptedMatch, Candidate, Provider, ProviderRole, Query, TaskPlan, trim_reference};
use crate::config::{PacingConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::matching::operator::Operator;
use crate::pacing::Pacer;
use crate::providers::ytdlp::{VideoInfo, YtDlp};
use crate::retry::call_with_backoff;
use crate::types::Uri;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// Provider name and URI namespace
pub const NAME: &str = "youtube";

const URL_PATTERNS: &[&str] = &["youtube.com", "youtu.be"];
const PLAYLIST_IDENTIFIER: &str = "/playlist?";

/// YouTube provider backed by yt-dlp
pub struct YouTubeProvider {
    ytdlp: Arc<YtDlp>,
    retry: RetryConfig,
    pacer: Pacer,
}

impl YouTubeProvider {
    /// Create the provider
    pub fn new(ytdlp: Arc<YtDlp>, retry: RetryConfig, pacing: &PacingConfig) -> Self {
        Self {
            ytdlp,
            retry,
            pacer: Pacer::new(NAME, pacing),
        }
    }

    /// Shared pacer for YouTube calls
    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }
}

/// Video id of a YouTube URL
///
/// Understands `watch?v=`, `youtu.be/<id>`, `/shorts/<id>` and `/embed/<id>`.
pub fn video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.");
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let id = if host == "youtu.be" {
        segments.next().map(str::to_string)
    } else {
        match segments.next() {
            Some("watch") => parsed
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some("shorts") | Some("embed") | Some("live") => segments.next().map(str::to_string),
            _ => None,
        }
    };
    id.filter(|id| !id.is_empty())
}

/// Query describing a video: the title, with the channel appended unless it already appears
pub fn describe_video(info: &VideoInfo, url: &str) -> Query {
    let mut title = info.title.clone().unwrap_or_default();
    if let Some(channel) = info.channel_name()
        && !title.to_lowercase().contains(&channel.to_lowercase())
    {
        title = format!("{title} - {channel}");
    }
    Query {
        title,
        artist: String::new(),
        album: None,
        duration: info.duration,
        source_url: url.to_string(),
        tags: None,
    }
}

fn to_candidate(info: VideoInfo) -> Candidate {
    let artists = info
        .channel_name()
        .map(|c| vec![c.to_string()])
        .unwrap_or_default();
    Candidate {
        id: info.id,
        title: info.title.unwrap_or_default(),
        artists,
        duration: info.duration,
    }
}

#[async_trait]
impl Provider for YouTubeProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn url_patterns(&self) -> &'static [&'static str] {
        URL_PATTERNS
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Track
    }

    fn search_platform(&self) -> &'static str {
        super::spotify::NAME
    }

    fn is_batch(&self, reference: &str) -> bool {
        reference.contains(PLAYLIST_IDENTIFIER)
    }

    fn url_to_uri(&self, url: &str) -> Result<Uri> {
        let id = video_id(url)
            .ok_or_else(|| Error::InvalidUri(format!("no YouTube video id in \"{url}\"")))?;
        Uri::new(NAME, &id)
    }

    fn uri_to_url(&self, uri: &Uri) -> String {
        format!("https://www.youtube.com/watch?v={}", uri.id())
    }

    async fn expand(&self, reference: &str) -> Result<Vec<String>> {
        if !self.is_batch(reference) {
            return Ok(vec![trim_reference(reference).to_string()]);
        }
        let entries = call_with_backoff(&self.retry, Some(&self.pacer), "youtube playlist", || {
            self.ytdlp.playlist(reference)
        })
        .await?;
        tracing::info!(playlist = reference, tracks = entries.len(), "Expanded YouTube playlist");
        Ok(entries
            .into_iter()
            .map(|e| format!("https://www.youtube.com/watch?v={}", e.id))
            .collect())
    }

    async fn describe(&self, url: &str, _market: &str) -> Result<Query> {
        let url = trim_reference(url);
        let info = call_with_backoff(&self.retry, Some(&self.pacer), "youtube video", || {
            self.ytdlp.video(url)
        })
        .await?;
        Ok(describe_video(&info, url))
    }

    fn search_string(&self, query: &Query) -> String {
        format!("{} {}", query.title, query.artist).trim().to_string()
    }

    async fn search(&self, text: &str, limit: usize, _market: &str) -> Result<Vec<Candidate>> {
        let results = call_with_backoff(&self.retry, Some(&self.pacer), "youtube search", || {
            self.ytdlp.search(text, limit)
        })
        .await?;
        Ok(results.into_iter().map(to_candidate).collect())
    }

    async fn accept(&self, candidate: &Candidate, _market: &str) -> Result<AcceptedMatch> {
        Ok(AcceptedMatch {
            track_uri: Some(Uri::new(NAME, &candidate.id)?),
            tags: None,
        })
    }

    async fn manual(
        &self,
        operator: &dyn Operator,
        _query: &Query,
        _market: &str,
    ) -> Result<Option<AcceptedMatch>> {
        let answer = operator.ask(">>> Provide YouTube URL:").await?;
        let url = trim_reference(&answer);
        if url.is_empty() {
            return Ok(None);
        }
        match self.url_to_uri(url) {
            Ok(uri) => Ok(Some(AcceptedMatch {
                track_uri: Some(uri),
                tags: None,
            })),
            Err(e) => {
                operator.show(&format!("Not a YouTube video URL: {e}"));
                Ok(None)
            }
        }
    }

    /// The video itself is the audio; tags come from the accepted match
    fn map_to_task(
        &self,
        query: &Query,
        source_uri: &Uri,
        accepted: AcceptedMatch,
    ) -> Result<TaskPlan> {
        let tags = accepted
            .tags
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InsufficientMetadata {
                reference: query.source_url.clone(),
                missing: "tags".to_string(),
            })?;
        Ok(TaskPlan {
            track_uri: source_uri.clone(),
            tags,
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::operator::ScriptedOperator;
    use crate::types::Tags;
    use std::path::PathBuf;

    fn provider() -> YouTubeProvider {
        YouTubeProvider::new(
            Arc::new(YtDlp::new(PathBuf::from("/nonexistent/yt-dlp"))),
            RetryConfig::default(),
            &PacingConfig::default(),
        )
    }

    #[test]
    fn video_ids_are_extracted_from_common_url_shapes() {
        for (url, id) in [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("https://youtube.com/watch?list=PL1&v=dQw4w9WgXcQ&t=10", "dQw4w9WgXcQ"),
            ("https://music.youtube.com/watch?v=abc123", "abc123"),
            ("https://youtu.be/dQw4w9WgXcQ?si=xyz", "dQw4w9WgXcQ"),
            ("https://www.youtube.com/shorts/short1", "short1"),
        ] {
            assert_eq!(video_id(url).as_deref(), Some(id), "{url}");
        }
        assert_eq!(video_id("https://www.youtube.com/playlist?list=PL1"), None);
        assert_eq!(video_id("not a url"), None);
    }

    #[test]
    fn uri_round_trips_through_canonical_url() {
        let p = provider();
        let uri = p.url_to_uri("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(uri.as_str(), "youtube.dQw4w9WgXcQ");
        assert_eq!(
            p.uri_to_url(&uri),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert!(matches!(
            p.url_to_uri("https://www.youtube.com/"),
            Err(Error::InvalidUri(_))
        ));
    }

    #[test]
    fn patterns_and_batches() {
        let p = provider();
        assert!(p.matches("https://www.youtube.com/watch?v=x"));
        assert!(p.matches("https://youtu.be/x"));
        assert!(!p.matches("https://open.spotify.com/track/x"));
        assert!(p.is_batch("https://www.youtube.com/playlist?list=PL1"));
        assert!(!p.is_batch("https://www.youtube.com/watch?v=x&list=PL1"));
        assert_eq!(p.role(), ProviderRole::Track);
        assert_eq!(p.search_platform(), "spotify");
    }

    #[tokio::test]
    async fn single_references_expand_to_themselves_without_tracking_parameters() {
        let p = provider();
        let expanded = p
            .expand("https://www.youtube.com/watch?v=x&pp=tracking")
            .await
            .unwrap();
        assert_eq!(expanded, vec!["https://www.youtube.com/watch?v=x"]);
    }

    #[test]
    fn description_appends_channel_unless_present() {
        let info = VideoInfo {
            id: "x".into(),
            title: Some("Song".into()),
            channel: Some("Band".into()),
            duration: Some(200.0),
            ..Default::default()
        };
        let q = describe_video(&info, "https://youtu.be/x");
        assert_eq!(q.title, "Song - Band");
        assert_eq!(q.artist, "");
        assert_eq!(q.duration, Some(200.0));

        let info = VideoInfo {
            title: Some("Band - Song (Official Video)".into()),
            ..info
        };
        assert_eq!(
            describe_video(&info, "https://youtu.be/x").title,
            "Band - Song (Official Video)"
        );
    }

    #[tokio::test]
    async fn accepted_candidates_become_track_uris() {
        let p = provider();
        let candidate = Candidate {
            id: "abc".into(),
            title: "Song".into(),
            ..Default::default()
        };
        let accepted = p.accept(&candidate, "US").await.unwrap();
        assert_eq!(accepted.track_uri.unwrap().as_str(), "youtube.abc");
        assert!(!p.is_complete(&Candidate::default()));
    }

    #[tokio::test]
    async fn manual_fallback_reads_a_url() {
        let p = provider();
        let op = ScriptedOperator::new(["https://www.youtube.com/watch?v=pasted&feature=share"]);
        let accepted = p.manual(&op, &Query::default(), "US").await.unwrap().unwrap();
        assert_eq!(accepted.track_uri.unwrap().as_str(), "youtube.pasted");

        let op = ScriptedOperator::new([""]);
        assert!(p.manual(&op, &Query::default(), "US").await.unwrap().is_none());
    }

    #[test]
    fn tasks_use_the_video_as_track() {
        let p = provider();
        let source = Uri::parse("youtube.abc").unwrap();
        let tags = Tags {
            title: Some("Song".into()),
            ..Default::default()
        };
        let plan = p
            .map_to_task(
                &Query::default(),
                &source,
                AcceptedMatch {
                    track_uri: None,
                    tags: Some(tags.clone()),
                },
            )
            .unwrap();
        assert_eq!(plan.track_uri, source);
        assert_eq!(plan.tags, tags);

        assert!(matches!(
            p.map_to_task(&Query::default(), &source, AcceptedMatch::default()),
            Err(Error::InsufficientMetadata { .. })
        ));
    }
}
