//! Spotify provider
//!
//! Spotify references carry metadata (tags); their audio is searched on
//! YouTube. Talks to the Web API with client-credentials authentication.
//! Every request, including the token exchange, goes through
//! [`call_with_backoff`] with a Spotify-scoped [`Pacer`].

use super::{AcceptedMatch, Candidate, Provider, ProviderRole, Query, TaskPlan};
use crate::config::{PacingConfig, RetryConfig, SpotifyConfig};
use crate::error::{Error, Result};
use crate::matching::operator::{Operator, input_is};
use crate::pacing::Pacer;
use crate::retry::{call_with_backoff, parse_retry_after};
use crate::types::{Tags, Uri};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Provider name and URI namespace
pub const NAME: &str = "spotify";

const URL_PATTERNS: &[&str] = &["open.spotify.com", "spotify.link", "spotify."];
const PLAYLIST_IDENTIFIER: &str = "/playlist/";
const ALBUM_IDENTIFIER: &str = "/album/";
const SHORT_LINK: &str = "spotify.link";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Fields a Spotify description must carry before a task is built
const REQUIRED_FIELDS: &[&str] = &["duration", "title", "album", "artist"];

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    3600
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Clone, Debug, Deserialize)]
struct Track {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artists: Vec<ArtistRef>,
    #[serde(default)]
    album: Option<Album>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    disc_number: Option<u32>,
    #[serde(default)]
    track_number: Option<u32>,
}

impl Track {
    fn artist_names(&self) -> Vec<String> {
        self.artists.iter().map(|a| a.name.clone()).collect()
    }

    fn duration_secs(&self) -> Option<f64> {
        self.duration_ms.map(|ms| ms as f64 / 1000.0)
    }
}

#[derive(Clone, Debug, Deserialize)]
struct ArtistRef {
    #[serde(default)]
    id: Option<String>,
    name: String,
}

#[derive(Clone, Debug, Deserialize)]
struct Album {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    images: Vec<Image>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    total_tracks: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
struct Image {
    url: String,
}

#[derive(Clone, Debug, Deserialize)]
struct Artist {
    #[serde(default)]
    name: String,
    #[serde(default)]
    genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackSearch {
    tracks: Paging<Track>,
}

#[derive(Debug, Deserialize)]
struct ArtistSearch {
    artists: Paging<Artist>,
}

#[derive(Debug, Deserialize)]
struct Artists {
    #[serde(default)]
    artists: Vec<Option<Artist>>,
}

/// Playlist entry; `track` is null for removed or local items
#[derive(Debug, Deserialize)]
struct PlaylistItem {
    #[serde(default)]
    track: Option<TrackStub>,
}

#[derive(Debug, Deserialize)]
struct TrackStub {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    disc_number: Option<u32>,
}

/// Kind of object a Spotify URL points at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// Single track
    Track,
    /// Album (batch)
    Album,
    /// Playlist (batch)
    Playlist,
}

/// Object kind and id of a Spotify URL or URI
///
/// Accepts `https://open.spotify.com/[intl-xx/]<kind>/<id>`,
/// `spotify:<kind>:<id>` and index URIs (`spotify.<id>`, always a track).
pub fn parse_object(reference: &str) -> Option<(ObjectKind, String)> {
    let reference = reference.trim();
    let kind_of = |s: &str| match s {
        "track" => Some(ObjectKind::Track),
        "album" => Some(ObjectKind::Album),
        "playlist" => Some(ObjectKind::Playlist),
        _ => None,
    };

    if let Some(rest) = reference.strip_prefix("spotify:") {
        let mut parts = rest.split(':');
        let kind = kind_of(parts.next()?)?;
        let id = parts.next().filter(|id| !id.is_empty())?;
        return Some((kind, id.to_string()));
    }
    if let Ok(uri) = Uri::parse(reference)
        && uri.provider() == NAME
    {
        return Some((ObjectKind::Track, uri.id().to_string()));
    }

    let url = Url::parse(reference).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    segments.windows(2).find_map(|pair| {
        let kind = kind_of(pair[0])?;
        Some((kind, pair[1].to_string()))
    })
}

/// Today's date as stored in `tagging_date`
fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Map transport failures to the retry taxonomy
fn map_transport(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("spotify: {e}"))
    } else {
        Error::Network(e)
    }
}

/// Map a non-success response to an error
async fn check_status(response: reqwest::Response, subject: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        429 => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            Err(Error::RateLimited {
                provider: NAME.to_string(),
                retry_after,
            })
        }
        400 | 404 => Err(Error::NotFound(format!(
            "{subject} (the object is probably private or does not exist)"
        ))),
        code => {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Provider {
                provider: NAME.to_string(),
                status: code,
                message: body.chars().take(200).collect(),
            })
        }
    }
}

/// Spotify Web API provider
pub struct SpotifyProvider {
    client: reqwest::Client,
    config: SpotifyConfig,
    retry: RetryConfig,
    pacer: Pacer,
    token: tokio::sync::Mutex<Option<AccessToken>>,
}

impl SpotifyProvider {
    /// Create the provider
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: SpotifyConfig, retry: RetryConfig, pacing: &PacingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("web2mp3/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            retry,
            pacer: Pacer::new(NAME, pacing),
            token: tokio::sync::Mutex::new(None),
        })
    }

    /// Shared pacer for Spotify calls
    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Bearer token, exchanged for client credentials when missing or expired
    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(t) = token.as_ref()
            && t.expires_at > Instant::now()
        {
            return Ok(t.value.clone());
        }

        let (Some(id), Some(secret)) = (&self.config.client_id, &self.config.client_secret) else {
            return Err(Error::Config {
                message: "Spotify credentials missing, set SPOTIPY_CLIENT_ID and SPOTIPY_CLIENT_SECRET"
                    .to_string(),
                key: Some("spotify.client_id".to_string()),
            });
        };

        let response = self
            .client
            .post(&self.config.auth_url)
            .basic_auth(id, Some(secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Config {
                message: format!("Spotify rejected the client credentials ({status})"),
                key: Some("spotify.client_id".to_string()),
            });
        }
        let response = check_status(response, "token request").await?;
        let body = response.bytes().await.map_err(map_transport)?;
        let granted: TokenResponse = serde_json::from_slice(&body)?;

        let lifetime = Duration::from_secs(granted.expires_in.saturating_sub(60).max(1));
        tracing::debug!(lifetime_secs = lifetime.as_secs(), "Obtained Spotify access token");
        *token = Some(AccessToken {
            value: granted.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(granted.access_token)
    }

    /// GET a JSON document with backoff and pacing
    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        call_with_backoff(&self.retry, Some(&self.pacer), operation, || async {
            let token = self.access_token().await?;
            let response = self
                .client
                .get(url)
                .query(query)
                .bearer_auth(token)
                .send()
                .await
                .map_err(map_transport)?;
            let response = check_status(response, url).await?;
            let body = response.bytes().await.map_err(map_transport)?;
            Ok(serde_json::from_slice(&body)?)
        })
        .await
    }

    async fn track(&self, id: &str, market: &str) -> Result<Track> {
        self.get_json(
            "spotify track",
            &self.endpoint(&format!("tracks/{id}")),
            &[("market", market.to_string())],
        )
        .await
    }

    /// Follow a `spotify.link` short link to its target
    pub async fn unshorten(&self, reference: &str) -> Result<String> {
        if !reference.contains(SHORT_LINK) {
            return Ok(reference.to_string());
        }
        self.resolve_redirects(reference).await
    }

    async fn resolve_redirects(&self, url: &str) -> Result<String> {
        let target = call_with_backoff(&self.retry, None, "spotify short link", || async {
            let response = self.client.head(url).send().await.map_err(map_transport)?;
            let response = check_status(response, url).await?;
            Ok(response.url().to_string())
        })
        .await?;
        tracing::debug!(from = url, to = %target, "Resolved short link");
        Ok(target)
    }

    /// Track ids of an album or playlist, following pagination
    async fn collection_ids(&self, kind: ObjectKind, id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        match kind {
            ObjectKind::Playlist => {
                let mut page: Paging<PlaylistItem> = self
                    .get_json(
                        "spotify playlist",
                        &self.endpoint(&format!("playlists/{id}/tracks")),
                        &[("offset", "0".to_string()), ("limit", "100".to_string())],
                    )
                    .await?;
                loop {
                    ids.extend(
                        page.items
                            .drain(..)
                            .filter_map(|i| i.track.and_then(|t| t.id)),
                    );
                    let Some(next) = page.next.take() else { break };
                    page = self.get_json("spotify playlist", &next, &[]).await?;
                }
            }
            ObjectKind::Album => {
                let mut page: Paging<TrackStub> = self
                    .get_json(
                        "spotify album",
                        &self.endpoint(&format!("albums/{id}/tracks")),
                        &[("offset", "0".to_string()), ("limit", "50".to_string())],
                    )
                    .await?;
                loop {
                    ids.extend(page.items.drain(..).filter_map(|t| t.id));
                    let Some(next) = page.next.take() else { break };
                    page = self.get_json("spotify album", &next, &[]).await?;
                }
            }
            ObjectKind::Track => ids.push(id.to_string()),
        }
        Ok(ids)
    }

    /// Number of discs on a track's album, read from the album's last track
    async fn disc_max(&self, track: &Track) -> Result<Option<u32>> {
        let Some(album) = &track.album else {
            return Ok(track.disc_number);
        };
        let (Some(album_id), Some(total)) = (&album.id, album.total_tracks) else {
            return Ok(track.disc_number);
        };
        let page: Paging<TrackStub> = self
            .get_json(
                "spotify album tracks",
                &self.endpoint(&format!("albums/{album_id}/tracks")),
                &[
                    ("offset", total.saturating_sub(1).to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(page
            .items
            .last()
            .and_then(|t| t.disc_number)
            .or(track.disc_number))
    }

    /// Genres of all credited artists, in credit order without repeats
    async fn genres(&self, track: &Track) -> Result<Option<String>> {
        let ids: Vec<&str> = track
            .artists
            .iter()
            .filter_map(|a| a.id.as_deref())
            .collect();
        if ids.is_empty() {
            return Ok(None);
        }
        let found: Artists = self
            .get_json(
                "spotify artists",
                &self.endpoint("artists"),
                &[("ids", ids.join(","))],
            )
            .await?;
        let mut genres: Vec<String> = Vec::new();
        for genre in found.artists.into_iter().flatten().flat_map(|a| a.genres) {
            if !genres.contains(&genre) {
                genres.push(genre);
            }
        }
        Ok((!genres.is_empty()).then(|| genres.join("; ")))
    }

    /// Full tags of a track
    async fn track_tags(&self, track: &Track) -> Result<Tags> {
        let disc_max = self.disc_max(track).await?;
        let genre = self.genres(track).await?;
        let artists = track.artist_names();
        let album = track.album.as_ref();
        Ok(Tags {
            album: album.map(|a| a.name.clone()).filter(|n| !n.is_empty()),
            album_artist: artists.first().cloned(),
            artist: (!artists.is_empty()).then(|| artists.join("; ")),
            bpm: None,
            cover: album.and_then(|a| a.images.first()).map(|i| i.url.clone()),
            disc_max,
            disc_num: track.disc_number,
            duration: track.duration_secs(),
            genre,
            internet_radio_url: track.id.as_ref().map(|id| format!("{NAME}.{id}")),
            release_date: album.and_then(|a| a.release_date.clone()),
            recording_date: album.and_then(|a| a.release_date.clone()),
            tagging_date: Some(today()),
            title: Some(track.name.clone()).filter(|n| !n.is_empty()),
            track_max: album.and_then(|a| a.total_tracks),
            track_num: track.track_number,
        })
    }

    /// Best artist match for a name
    async fn search_artist(&self, name: &str, market: &str) -> Result<Option<Artist>> {
        let found: ArtistSearch = self
            .get_json(
                "spotify artist search",
                &self.endpoint("search"),
                &[
                    ("q", name.to_string()),
                    ("type", "artist".to_string()),
                    ("limit", "1".to_string()),
                    ("market", market.to_string()),
                ],
            )
            .await?;
        Ok(found.artists.items.into_iter().next())
    }
}

/// Ask for an optional number; blank or invalid input yields `None`
async fn ask_number(operator: &dyn Operator, prompt: &str) -> Result<Option<u32>> {
    let answer = operator.ask(prompt).await?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(None);
    }
    match answer.parse() {
        Ok(n) => Ok(Some(n)),
        Err(_) => {
            operator.show(&format!("Ignoring invalid number \"{answer}\""));
            Ok(None)
        }
    }
}

async fn ask_text(operator: &dyn Operator, prompt: &str) -> Result<Option<String>> {
    let answer = operator.ask(prompt).await?;
    let answer = answer.trim();
    Ok((!answer.is_empty()).then(|| answer.to_string()))
}

#[async_trait]
impl Provider for SpotifyProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn url_patterns(&self) -> &'static [&'static str] {
        URL_PATTERNS
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Tags
    }

    fn search_platform(&self) -> &'static str {
        super::youtube::NAME
    }

    fn required_fields(&self) -> &'static [&'static str] {
        REQUIRED_FIELDS
    }

    fn is_batch(&self, reference: &str) -> bool {
        reference.contains(PLAYLIST_IDENTIFIER) || reference.contains(ALBUM_IDENTIFIER)
    }

    fn url_to_uri(&self, url: &str) -> Result<Uri> {
        match parse_object(url) {
            Some((ObjectKind::Track, id)) => Uri::new(NAME, &id),
            Some((kind, _)) => Err(Error::InvalidUri(format!(
                "\"{url}\" is a {kind:?}, not a track"
            ))),
            None => Err(Error::InvalidUri(format!("no Spotify id in \"{url}\""))),
        }
    }

    fn uri_to_url(&self, uri: &Uri) -> String {
        format!("https://open.spotify.com/track/{}", uri.id())
    }

    async fn expand(&self, reference: &str) -> Result<Vec<String>> {
        let url = self.unshorten(reference.trim()).await?;
        let Some((kind, id)) = parse_object(&url) else {
            return Err(Error::InvalidUri(format!("no Spotify id in \"{url}\"")));
        };
        if kind == ObjectKind::Track {
            return Ok(vec![url]);
        }
        let ids = self.collection_ids(kind, &id).await?;
        tracing::info!(reference = %url, kind = ?kind, tracks = ids.len(), "Expanded Spotify collection");
        Ok(ids
            .iter()
            .map(|id| format!("https://open.spotify.com/track/{id}"))
            .collect())
    }

    async fn describe(&self, url: &str, market: &str) -> Result<Query> {
        let uri = self.url_to_uri(url)?;
        let track = self.track(uri.id(), market).await?;
        let tags = self.track_tags(&track).await?;
        Ok(Query {
            title: track.name.clone(),
            artist: track.artist_names().join("; "),
            album: tags.album.clone(),
            duration: track.duration_secs(),
            source_url: url.to_string(),
            tags: Some(tags),
        })
    }

    async fn search(&self, text: &str, limit: usize, market: &str) -> Result<Vec<Candidate>> {
        let found: TrackSearch = self
            .get_json(
                "spotify search",
                &self.endpoint("search"),
                &[
                    ("q", text.to_string()),
                    ("type", "track".to_string()),
                    ("limit", limit.to_string()),
                    ("market", market.to_string()),
                ],
            )
            .await?;
        Ok(found
            .tracks
            .items
            .into_iter()
            .map(|t| Candidate {
                artists: t.artist_names(),
                duration: t.duration_secs(),
                id: t.id.unwrap_or_default(),
                title: t.name,
            })
            .collect())
    }

    async fn accept(&self, candidate: &Candidate, market: &str) -> Result<AcceptedMatch> {
        let track = self.track(&candidate.id, market).await?;
        Ok(AcceptedMatch {
            track_uri: None,
            tags: Some(self.track_tags(&track).await?),
        })
    }

    /// Operator types the tags; the artist is confirmed against a Spotify artist search
    async fn manual(
        &self,
        operator: &dyn Operator,
        query: &Query,
        market: &str,
    ) -> Result<Option<AcceptedMatch>> {
        operator.show("Provide manual track info:");
        let album = ask_text(operator, ">>> Album name?").await?;
        let album_artist = ask_text(operator, ">>> Artist name?").await?;
        let cover = ask_text(operator, ">>> Cover URL?").await?;
        let disc_num = ask_number(operator, ">>> Disc No.?").await?.unwrap_or(1);
        let release_date = ask_text(operator, ">>> Album year?").await?;
        let title = ask_text(operator, ">>> Track name?").await?;
        let track_num = ask_number(operator, ">>> Track No.?").await?.unwrap_or(1);
        let track_max = ask_number(operator, ">>> No. album tracks?")
            .await?
            .unwrap_or(track_num);

        let Some(title) = title else {
            operator.show("No track name given");
            return Ok(None);
        };

        let mut tags = Tags {
            album: album.or_else(|| Some(title.clone())),
            album_artist: album_artist.clone(),
            artist: album_artist.clone(),
            cover,
            disc_max: Some(disc_num),
            disc_num: Some(disc_num),
            duration: query.duration,
            internet_radio_url: Some(Tags::MANUAL.to_string()),
            recording_date: release_date.clone(),
            release_date,
            tagging_date: Some(today()),
            title: Some(title),
            track_max: Some(track_max),
            track_num: Some(track_num),
            ..Default::default()
        };

        if let Some(name) = &album_artist {
            match self.search_artist(name, market).await {
                Ok(Some(found)) => {
                    let answer = operator
                        .ask(&format!(
                            ">>> Is this the artist you were looking for? \"{}\" [Yes]/No",
                            found.name
                        ))
                        .await?;
                    if !input_is("No", answer.trim()) {
                        tags.artist = Some(found.name);
                        tags.genre = (!found.genres.is_empty()).then(|| found.genres.join("; "));
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_storage_failure() => return Err(e),
                Err(e) => tracing::warn!(error = %e, artist = %name, "Artist lookup failed, keeping typed name"),
            }
        }

        Ok(Some(AcceptedMatch {
            track_uri: None,
            tags: Some(tags),
        }))
    }

    /// Tags come from the description; the audio is the accepted match
    fn map_to_task(
        &self,
        query: &Query,
        _source_uri: &Uri,
        accepted: AcceptedMatch,
    ) -> Result<TaskPlan> {
        let track_uri = accepted.track_uri.ok_or_else(|| {
            Error::NoAcceptableMatch(format!("no audio source accepted for {}", query.source_url))
        })?;
        let tags = query
            .tags
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InsufficientMetadata {
                reference: query.source_url.clone(),
                missing: "tags".to_string(),
            })?;
        Ok(TaskPlan { track_uri, tags })
    }
}
