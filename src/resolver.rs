//! Reference resolution
//!
//! Turns a pasted reference into a Pending task in the [`TaskIndex`]:
//!
//! 1. expand batches (playlists, albums, short links) into single items
//! 2. describe the item with its own provider
//! 3. look up a match on the counterpart provider ([`lookup`])
//! 4. build the task and record the tags, track and source URIs
//!
//! Every item ends in exactly one [`Status`]. Failures of one item never stop
//! the rest of a batch, except storage failures, which are returned.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::TaskIndex;
use crate::library::Library;
use crate::matching::{LookupOptions, Operator, lookup};
use crate::providers::{Provider, ProviderRegistry, Query, trim_reference};
use crate::retry::IsRetryable;
use crate::types::{Status, TaskSettings, Uri};
use std::sync::Arc;

/// Reference-to-task pipeline
pub struct Resolver {
    registry: ProviderRegistry,
    index: TaskIndex,
    library: Library,
    options: LookupOptions,
    settings: TaskSettings,
    operator: Arc<dyn Operator>,
}

impl Resolver {
    /// Create a resolver from the configuration
    pub fn new(
        config: &Config,
        registry: ProviderRegistry,
        index: TaskIndex,
        operator: Arc<dyn Operator>,
    ) -> Self {
        Self {
            registry,
            index,
            library: Library::new(&config.paths.music_dir),
            options: LookupOptions::from_config(&config.matching),
            settings: config.download.task_settings(),
            operator,
        }
    }

    /// Task index the resolver writes to
    pub fn index(&self) -> &TaskIndex {
        &self.index
    }

    /// Expand a reference into single-item references
    ///
    /// Anything from the first `&` on is ignored; an empty reference expands
    /// to nothing.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownReference`] if no provider owns the reference, or the
    /// provider's expansion error.
    pub async fn expand(&self, reference: &str) -> Result<Vec<String>> {
        let reference = trim_reference(reference);
        if reference.is_empty() {
            return Ok(Vec::new());
        }
        let provider = self.registry.resolve(reference)?;
        let items = provider.expand(reference).await?;
        if items.len() > 1 || provider.is_batch(reference) {
            tracing::info!(provider = provider.name(), reference, items = items.len(), "Expanded batch reference");
        }
        Ok(items)
    }

    /// Resolve every item of every reference
    ///
    /// # Errors
    ///
    /// Only storage failures are returned; every other failure becomes a
    /// [`Status::Failed`] for its item.
    pub async fn resolve_all(&self, references: &[String]) -> Result<Vec<Status>> {
        let mut statuses = Vec::new();
        for reference in references {
            statuses.extend(self.resolve_reference(reference).await?);
        }
        Ok(statuses)
    }

    /// Expand one reference and resolve each of its items
    pub async fn resolve_reference(&self, reference: &str) -> Result<Vec<Status>> {
        let items = match self.expand(reference).await {
            Ok(items) => items,
            Err(e) if e.is_storage_failure() => return Err(e),
            Err(e) => {
                let status = Status::Failed(format!("could not unpack \"{reference}\": {e}"));
                tracing::warn!(reference, error = %e, "Failed to unpack reference");
                return Ok(vec![status]);
            }
        };
        let mut statuses = Vec::with_capacity(items.len());
        for item in &items {
            statuses.push(self.resolve(item).await?);
        }
        Ok(statuses)
    }

    /// Resolve a single-item reference into a Pending task
    ///
    /// The source URI is registered as seen once the item reached a definite
    /// outcome: success, skip, permanent provider failure, or no acceptable
    /// match. Transient failures leave it unknown so a later run retries.
    ///
    /// # Errors
    ///
    /// Storage failures ([`Error::Io`]).
    pub async fn resolve(&self, url: &str) -> Result<Status> {
        let url = trim_reference(url);
        let provider = match self.registry.resolve(url) {
            Ok(p) => p,
            Err(e) => return Ok(self.report(url, Status::Failed(e.to_string()))),
        };
        let source_uri = match provider.url_to_uri(url) {
            Ok(uri) => uri,
            Err(e) => return Ok(self.report(url, Status::Failed(e.to_string()))),
        };
        tracing::info!(provider = provider.name(), uri = %source_uri, url, "Resolving reference");

        let status = match self.do_match(url, provider.as_ref(), &source_uri).await {
            Ok(status) => status,
            Err(e) if e.is_storage_failure() => return Err(e),
            Err(e) => {
                let settle = e.is_permanent() || matches!(e, Error::NoAcceptableMatch(_));
                if !settle {
                    tracing::warn!(uri = %source_uri, error = %e, retryable = e.is_retryable(), "Reference left for a later run");
                    return Ok(self.report(url, Status::Failed(e.to_string())));
                }
                Status::Failed(e.to_string())
            }
        };
        self.index.mark_seen(&source_uri).await?;
        Ok(self.report(url, status))
    }

    async fn do_match(&self, url: &str, source: &dyn Provider, source_uri: &Uri) -> Result<Status> {
        let overwrite = self.settings.overwrite;
        if !overwrite && self.index.exists(source_uri).await? {
            return Ok(Status::Skipped(format!("TrackExists \"{source_uri}\"")));
        }

        let mut query = source.describe(url, &self.options.market).await?;

        if self
            .library
            .file_from_tags_exists(query.tags.as_ref(), self.settings.avoid_duplicates)
            .await?
        {
            return Ok(Status::Skipped("FileExists".to_string()));
        }

        let missing = missing_fields(&query, source.required_fields());
        if !missing.is_empty() {
            return Err(Error::InsufficientMetadata {
                reference: source_uri.to_string(),
                missing: missing.join(", "),
            });
        }

        let search = self.registry.search_platform_for(source)?;
        let accepted = lookup(&mut query, search.as_ref(), &self.options, self.operator.as_ref())
            .await?
            .into_result()?;
        let plan = source.map_to_task(&query, source_uri, accepted)?;

        if self
            .library
            .file_from_tags_exists(Some(&plan.tags), self.settings.avoid_duplicates)
            .await?
        {
            return Ok(Status::Skipped("FileExists".to_string()));
        }

        let tags_uri = plan.tags.tags_uri();
        if !overwrite {
            let mut existing = Vec::new();
            for (label, uri) in [
                ("TagExists", tags_uri.as_ref()),
                ("TrackExists", Some(&plan.track_uri)),
                ("SourceExists", Some(source_uri)),
            ] {
                if let Some(uri) = uri
                    && self.index.exists(uri).await?
                {
                    existing.push(label);
                }
            }
            if !existing.is_empty() {
                return Ok(Status::Skipped(existing.join(" ")));
            }
        }

        if let Some(tags_uri) = &tags_uri {
            self.index.mark_seen(tags_uri).await?;
        }
        self.index
            .write(&plan.track_uri, Some(&plan.tags), Some(&self.settings), true)
            .await?;
        tracing::info!(track = %plan.track_uri, tags = ?tags_uri, "Download task added");

        let tags_label = tags_uri.map_or_else(|| "manual".to_string(), |u| u.to_string());
        Ok(Status::Success(format!(
            "Download added. TAG {tags_label} AUDIO {}",
            plan.track_uri
        )))
    }

    fn report(&self, url: &str, status: Status) -> Status {
        match &status {
            Status::Failed(reason) => tracing::warn!(url, reason = %reason, "Reference failed"),
            _ => tracing::info!(url, status = %status, "Reference processed"),
        }
        status
    }
}

/// Required fields absent from a description
fn missing_fields(query: &Query, required: &[&'static str]) -> Vec<&'static str> {
    if let Some(tags) = &query.tags {
        return tags.missing_fields(required);
    }
    required
        .iter()
        .copied()
        .filter(|field| match *field {
            "title" => query.title.trim().is_empty(),
            "artist" => query.artist.trim().is_empty(),
            "album" => query.album.as_deref().is_none_or(|a| a.trim().is_empty()),
            "duration" => !query.duration.is_some_and(|d| d > 0.0),
            _ => false,
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
