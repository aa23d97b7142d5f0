//! Content providers
//!
//! A provider recognises its own references (URLs), describes them as a
//! [`Query`], searches its catalogue for [`Candidate`]s and knows how a
//! matched pair turns into a download task. Providers are registered
//! explicitly in a [`ProviderRegistry`] at startup.
//!
//! Every remote call a provider makes goes through
//! [`call_with_backoff`](crate::retry::call_with_backoff) with the provider's
//! own [`Pacer`](crate::pacing::Pacer).
//!
//! ## Implementations
//!
//! - [`SpotifyProvider`]: metadata source (tags), Web API over HTTP
//! - [`YouTubeProvider`]: audio source (tracks), driven through yt-dlp

use crate::config::Config;
use crate::error::{Error, Result};
use crate::matching::operator::Operator;
use crate::types::{Tags, Uri};
use async_trait::async_trait;
use std::sync::Arc;

pub mod spotify;
pub mod youtube;
pub mod ytdlp;

pub use spotify::SpotifyProvider;
pub use youtube::YouTubeProvider;
pub use ytdlp::YtDlp;

/// Normalised description of a reference, used to search the counterpart provider
///
/// Mutable during interactive lookup: Retry replaces the title and clears
/// the artist.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    /// Track or video title
    pub title: String,
    /// Artist (or channel) name, may be empty
    pub artist: String,
    /// Album name, if known
    pub album: Option<String>,
    /// Duration in seconds, if known
    pub duration: Option<f64>,
    /// Reference the query was built from
    pub source_url: String,
    /// Full tags when the source is a metadata provider
    pub tags: Option<Tags>,
}

/// One search result; never persisted
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidate {
    /// Provider-native identifier
    pub id: String,
    /// Title
    pub title: String,
    /// Artist or channel names
    pub artists: Vec<String>,
    /// Duration in seconds, if known
    pub duration: Option<f64>,
}

impl Candidate {
    /// Artists joined with `; `
    pub fn artist(&self) -> String {
        self.artists.join("; ")
    }

    /// `title - artist` line used in listings
    pub fn describe(&self) -> String {
        format!("{} - {}", self.title, self.artist())
    }
}

/// What an accepted candidate contributes to the task
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AcceptedMatch {
    /// Audio identity, when the search provider serves audio
    pub track_uri: Option<Uri>,
    /// Tags, when the search provider serves metadata
    pub tags: Option<Tags>,
}

/// Download task derived from a matched reference
#[derive(Clone, Debug, PartialEq)]
pub struct TaskPlan {
    /// Identity of the audio to fetch; the only key that carries a payload
    pub track_uri: Uri,
    /// Tags to store with the task
    pub tags: Tags,
}

/// Role a provider plays for the references it owns
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderRole {
    /// References carry metadata; audio is searched elsewhere
    Tags,
    /// References carry audio; metadata is searched elsewhere
    Track,
}

/// Interface shared by all content providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, also the URI namespace
    fn name(&self) -> &'static str;

    /// Substrings identifying this provider's references
    fn url_patterns(&self) -> &'static [&'static str];

    /// What this provider's references contribute
    fn role(&self) -> ProviderRole;

    /// Name of the provider to search when resolving this provider's references
    fn search_platform(&self) -> &'static str;

    /// Fields a description must carry before a task can be built
    fn required_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether `reference` belongs to this provider
    fn matches(&self, reference: &str) -> bool {
        self.url_patterns().iter().any(|p| reference.contains(p))
    }

    /// Whether `reference` names a batch (playlist or album)
    fn is_batch(&self, reference: &str) -> bool;

    /// Identity of a single-item reference
    fn url_to_uri(&self, url: &str) -> Result<Uri>;

    /// Canonical URL of a URI
    fn uri_to_url(&self, uri: &Uri) -> String;

    /// Expand a reference into single-item references
    ///
    /// Resolves short links, and turns playlists and albums into their
    /// tracks. A single-item reference expands to itself.
    async fn expand(&self, reference: &str) -> Result<Vec<String>>;

    /// Describe a single-item reference
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the provider confirms the reference is invalid or private.
    async fn describe(&self, url: &str, market: &str) -> Result<Query>;

    /// Free-text search string for a query
    fn search_string(&self, query: &Query) -> String {
        format!("{} {}", query.title, query.artist).trim().to_string()
    }

    /// Search the catalogue
    async fn search(&self, text: &str, limit: usize, market: &str) -> Result<Vec<Candidate>>;

    /// Whether a candidate carries every field needed to accept it
    fn is_complete(&self, candidate: &Candidate) -> bool {
        !candidate.id.is_empty() && !candidate.title.is_empty()
    }

    /// Turn an accepted candidate into its task contribution
    async fn accept(&self, candidate: &Candidate, market: &str) -> Result<AcceptedMatch>;

    /// Let the operator supply a match directly
    ///
    /// Returns `None` if the operator gave nothing usable.
    async fn manual(
        &self,
        operator: &dyn Operator,
        query: &Query,
        market: &str,
    ) -> Result<Option<AcceptedMatch>>;

    /// Build the download task for one of this provider's references
    fn map_to_task(&self, query: &Query, source_uri: &Uri, accepted: AcceptedMatch)
    -> Result<TaskPlan>;
}

/// Static set of providers, registered explicitly at startup
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the Spotify and YouTube providers
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_defaults(config: &Config, ytdlp: Arc<YtDlp>) -> Result<Self> {
        let mut registry = Self::new();
        registry
            .register(Arc::new(SpotifyProvider::new(
                config.spotify.clone(),
                config.retry.clone(),
                &config.pacing,
            )?))
            .register(Arc::new(YouTubeProvider::new(
                ytdlp,
                config.retry.clone(),
                &config.pacing,
            )));
        Ok(registry)
    }

    /// Add a provider; earlier registrations win when patterns overlap
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        tracing::debug!(provider = provider.name(), "Registered provider");
        self.providers.push(provider);
        self
    }

    /// Provider owning `reference`
    ///
    /// # Errors
    ///
    /// [`Error::UnknownReference`] if no registered pattern matches.
    pub fn resolve(&self, reference: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.matches(reference))
            .cloned()
            .ok_or_else(|| {
                let known: Vec<&str> = self
                    .providers
                    .iter()
                    .flat_map(|p| p.url_patterns().iter().copied())
                    .collect();
                Error::UnknownReference(format!(
                    "no pattern found in \"{reference}\", known patterns: {}",
                    known.join("; ")
                ))
            })
    }

    /// Provider by name (URI namespace)
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// Provider to search when resolving `source`'s references
    pub fn search_platform_for(&self, source: &dyn Provider) -> Result<Arc<dyn Provider>> {
        let name = source.search_platform();
        self.get(name).ok_or_else(|| Error::Config {
            message: format!("search platform \"{name}\" for {} is not registered", source.name()),
            key: None,
        })
    }

    /// Names of registered providers
    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// Strip everything from the first `&` on, as pasted links often carry tracking parameters
pub(crate) fn trim_reference(reference: &str) -> &str {
    reference.split('&').next().unwrap_or(reference).trim()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod testing;
