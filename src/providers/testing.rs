//! In-memory provider for unit tests

use super::{AcceptedMatch, Candidate, Provider, ProviderRole, Query, TaskPlan};
use crate::error::{Error, Result};
use crate::matching::operator::Operator;
use crate::types::{Tags, Uri};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Canned failure for `describe`
#[derive(Clone, Copy, Debug)]
pub(crate) enum FakeFailure {
    NotFound,
    Exhausted,
    Storage,
}

impl FakeFailure {
    fn to_error(self, url: &str) -> Error {
        match self {
            FakeFailure::NotFound => Error::NotFound(url.to_string()),
            FakeFailure::Exhausted => Error::RetriesExhausted {
                operation: "fake describe".to_string(),
                attempts: 10,
                last_error: "rate limit reached".to_string(),
            },
            FakeFailure::Storage => Error::Io(std::io::Error::other("disk full")),
        }
    }
}

pub(crate) struct FakeProvider {
    name: &'static str,
    patterns: &'static [&'static str],
    role: ProviderRole,
    search_platform: &'static str,
    required: &'static [&'static str],
    descriptions: HashMap<String, Query>,
    failures: HashMap<String, FakeFailure>,
    expansions: HashMap<String, Vec<String>>,
    results: Vec<Candidate>,
    results_for: HashMap<String, Vec<Candidate>>,
    manual: Option<AcceptedMatch>,
    searches: Mutex<Vec<(String, String)>>,
}

impl FakeProvider {
    fn new(
        name: &'static str,
        patterns: &'static [&'static str],
        role: ProviderRole,
        search_platform: &'static str,
    ) -> Self {
        Self {
            name,
            patterns,
            role,
            search_platform,
            required: &[],
            descriptions: HashMap::new(),
            failures: HashMap::new(),
            expansions: HashMap::new(),
            results: Vec::new(),
            results_for: HashMap::new(),
            manual: None,
            searches: Mutex::new(Vec::new()),
        }
    }

    /// Metadata source named `spotify`, references on `sp.test`
    pub(crate) fn tags_source() -> Self {
        Self::new("spotify", &["sp.test"], ProviderRole::Tags, "youtube")
    }

    /// Audio source named `youtube`, references on `yt.test`
    pub(crate) fn track_source() -> Self {
        Self::new("youtube", &["yt.test"], ProviderRole::Track, "spotify")
    }

    pub(crate) fn requiring(mut self, fields: &'static [&'static str]) -> Self {
        self.required = fields;
        self
    }

    pub(crate) fn with_description(mut self, url: &str, query: Query) -> Self {
        self.descriptions.insert(url.to_string(), query);
        self
    }

    pub(crate) fn failing(mut self, url: &str, failure: FakeFailure) -> Self {
        self.failures.insert(url.to_string(), failure);
        self
    }

    pub(crate) fn with_expansion(mut self, url: &str, items: &[&str]) -> Self {
        self.expansions
            .insert(url.to_string(), items.iter().map(|s| s.to_string()).collect());
        self
    }

    pub(crate) fn with_results(mut self, results: Vec<Candidate>) -> Self {
        self.results = results;
        self
    }

    pub(crate) fn with_results_for(mut self, text: &str, results: Vec<Candidate>) -> Self {
        self.results_for.insert(text.to_string(), results);
        self
    }

    pub(crate) fn with_manual(mut self, accepted: AcceptedMatch) -> Self {
        self.manual = Some(accepted);
        self
    }

    /// `(search text, market)` of every search, in order
    pub(crate) fn searches(&self) -> Vec<(String, String)> {
        self.searches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub(crate) fn candidate(id: &str, title: &str, artist: &str, duration: Option<f64>) -> Candidate {
    Candidate {
        id: id.to_string(),
        title: title.to_string(),
        artists: vec![artist.to_string()],
        duration,
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn url_patterns(&self) -> &'static [&'static str] {
        self.patterns
    }

    fn role(&self) -> ProviderRole {
        self.role
    }

    fn search_platform(&self) -> &'static str {
        self.search_platform
    }

    fn required_fields(&self) -> &'static [&'static str] {
        self.required
    }

    fn is_batch(&self, reference: &str) -> bool {
        self.expansions.contains_key(reference)
    }

    fn url_to_uri(&self, url: &str) -> Result<Uri> {
        let id = url.rsplit('/').next().unwrap_or_default();
        Uri::new(self.name, id)
    }

    fn uri_to_url(&self, uri: &Uri) -> String {
        format!("https://{}/{}", self.patterns[0], uri.id())
    }

    async fn expand(&self, reference: &str) -> Result<Vec<String>> {
        Ok(self
            .expansions
            .get(reference)
            .cloned()
            .unwrap_or_else(|| vec![reference.to_string()]))
    }

    async fn describe(&self, url: &str, _market: &str) -> Result<Query> {
        if let Some(failure) = self.failures.get(url) {
            return Err(failure.to_error(url));
        }
        self.descriptions
            .get(url)
            .cloned()
            .ok_or_else(|| Error::NotFound(url.to_string()))
    }

    async fn search(&self, text: &str, _limit: usize, market: &str) -> Result<Vec<Candidate>> {
        self.searches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((text.to_string(), market.to_string()));
        Ok(self
            .results_for
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.results.clone()))
    }

    async fn accept(&self, candidate: &Candidate, _market: &str) -> Result<AcceptedMatch> {
        Ok(match self.role {
            ProviderRole::Track => AcceptedMatch {
                track_uri: Some(Uri::new(self.name, &candidate.id)?),
                tags: None,
            },
            ProviderRole::Tags => AcceptedMatch {
                track_uri: None,
                tags: Some(Tags {
                    title: Some(candidate.title.clone()),
                    artist: Some(candidate.artist()),
                    album_artist: candidate.artists.first().cloned(),
                    album: Some(format!("{} Album", candidate.title)),
                    duration: candidate.duration,
                    internet_radio_url: Some(format!("{}.{}", self.name, candidate.id)),
                    ..Default::default()
                }),
            },
        })
    }

    async fn manual(
        &self,
        _operator: &dyn Operator,
        _query: &Query,
        _market: &str,
    ) -> Result<Option<AcceptedMatch>> {
        Ok(self.manual.clone())
    }

    fn map_to_task(
        &self,
        query: &Query,
        source_uri: &Uri,
        accepted: AcceptedMatch,
    ) -> Result<TaskPlan> {
        match self.role {
            ProviderRole::Track => Ok(TaskPlan {
                track_uri: source_uri.clone(),
                tags: accepted.tags.ok_or_else(|| Error::InsufficientMetadata {
                    reference: query.source_url.clone(),
                    missing: "tags".to_string(),
                })?,
            }),
            ProviderRole::Tags => Ok(TaskPlan {
                track_uri: accepted
                    .track_uri
                    .ok_or_else(|| Error::NoAcceptableMatch(query.source_url.clone()))?,
                tags: query.tags.clone().ok_or_else(|| Error::InsufficientMetadata {
                    reference: query.source_url.clone(),
                    missing: "tags".to_string(),
                })?,
            }),
        }
    }
}
