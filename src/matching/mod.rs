//! Candidate ranking and matching
//!
//! [`lookup`] turns a [`Query`] into an accepted match on a search provider:
//!
//! 1. search the provider (empty results end the lookup)
//! 2. score and rank the candidates ([`scoring`])
//! 3. accept the first complete candidate whose title and artist match after
//!    normalisation ([`normalize`]) and whose duration is within tolerance
//! 4. otherwise ask the [`Operator`] (or use the configured default response):
//!    pick a candidate, retry with new text, enter the match manually, change
//!    market, or abort
//!
//! Retry and Change-market loop back to step 1 with the mutated query, for at
//! most `max_rounds` rounds.

use crate::config::MatchingConfig;
use crate::error::{Error, Result};
use crate::providers::{AcceptedMatch, Provider, Query};
use crate::types::SortBy;

pub mod normalize;
pub mod operator;
pub mod scoring;

pub use normalize::{compare_meta, sanitize_track_name, strip};
pub use operator::{ConsoleOperator, Operator, Response, ScriptedOperator};
pub use scoring::{Ranked, Scores, duration_similarity, rank};

/// Longest search text shown in full
const SHOWN_QUERY_LEN: usize = 50;

/// Parameters of one lookup
#[derive(Clone, Debug)]
pub struct LookupOptions {
    /// Ranking key
    pub sort_by: SortBy,
    /// Maximum `|relative_duration - 1|` for automatic acceptance
    pub tolerance: f64,
    /// Candidates requested per search
    pub search_limit: usize,
    /// Initial market; Change-market only affects the current lookup
    pub market: String,
    /// Answer used instead of prompting (headless mode)
    pub default_response: Option<Response>,
    /// Upper bound on search rounds
    pub max_rounds: u32,
}

impl LookupOptions {
    /// Options from the matching configuration
    pub fn from_config(config: &MatchingConfig) -> Self {
        Self {
            sort_by: config.sort_by,
            tolerance: config.duration_tolerance,
            search_limit: config.search_limit,
            market: config.market.clone(),
            default_response: config.default_response.as_deref().map(Response::parse),
            max_rounds: config.max_prompt_rounds.max(1),
        }
    }

    fn headless(&self) -> bool {
        self.default_response.is_some()
    }
}

/// Terminal state of a lookup
#[derive(Clone, Debug, PartialEq)]
pub enum LookupOutcome {
    /// A candidate (or manual input) was accepted
    Accepted(AcceptedMatch),
    /// No match: operator abort, no results, or rounds exhausted
    Aborted(String),
}

impl LookupOutcome {
    /// Convert an abort into [`Error::NoAcceptableMatch`]
    pub fn into_result(self) -> Result<AcceptedMatch> {
        match self {
            LookupOutcome::Accepted(accepted) => Ok(accepted),
            LookupOutcome::Aborted(reason) => Err(Error::NoAcceptableMatch(reason)),
        }
    }
}

/// Whether a ranked candidate passes the automatic acceptance rule
pub fn is_clear_match(query: &Query, ranked: &Ranked, tolerance: f64) -> bool {
    let duration_match = ranked
        .scores
        .relative_duration
        .is_some_and(|r| (r - 1.0).abs() < tolerance);
    ranked.complete
        && duration_match
        && compare_meta(&ranked.candidate.title, &query.title)
        && compare_meta(&ranked.candidate.artist(), &query.artist)
}

fn shorten(text: &str) -> String {
    if text.chars().count() <= SHOWN_QUERY_LEN + 3 {
        text.to_string()
    } else {
        let head: String = text.chars().take(SHOWN_QUERY_LEN).collect();
        format!("{head}...")
    }
}

fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:>4.0}%", v * 100.0),
        None => "   -%".to_string(),
    }
}

fn listing_line(n: usize, ranked: &Ranked, sort_by: SortBy) -> String {
    let desc: String = ranked.candidate.describe().chars().take(46).collect();
    let marker = if ranked.complete { "" } else { " (incomplete)" };
    format!(
        "{n}) {desc:<47} {} {} {}{marker}",
        percent(Some(ranked.scores.key(sort_by))),
        percent(ranked.scores.relative_duration),
        percent(Some(ranked.scores.title)),
    )
}

fn selection_prompt(count: usize) -> String {
    let options: Vec<String> = (1..=count)
        .map(|i| if i == 1 { "[1]".to_string() } else { i.to_string() })
        .collect();
    format!(">>> {}/Retry/Manual/Abort/Change market:", options.join("/"))
}

/// Resolve a query to an accepted match on `provider`
///
/// # Arguments
///
/// * `query` - Description to match; Retry replaces its title and clears its artist
/// * `provider` - Search provider
/// * `options` - Ranking, tolerance and prompting parameters
/// * `operator` - Source of decisions when no candidate is accepted automatically
///
/// # Errors
///
/// Provider failures (including [`Error::RetriesExhausted`]) and operator I/O
/// errors are returned unchanged; they are not turned into aborts.
pub async fn lookup(
    query: &mut Query,
    provider: &dyn Provider,
    options: &LookupOptions,
    operator: &dyn Operator,
) -> Result<LookupOutcome> {
    let origin = if options.headless() { "default" } else { "the user" };
    let mut market = options.market.clone();

    for round in 1..=options.max_rounds.max(1) {
        let text = provider.search_string(query);
        operator.show(&format!(
            "Searching {} for: \"{}\"",
            provider.name(),
            shorten(&text)
        ));
        let candidates = provider
            .search(&text, options.search_limit, &market)
            .await?;
        tracing::debug!(
            provider = provider.name(),
            round,
            results = candidates.len(),
            market = %market,
            "Search completed"
        );

        if candidates.is_empty() {
            operator.show(&format!("No results found for {origin} search."));
            return Ok(LookupOutcome::Aborted(format!(
                "no {} results for \"{text}\"",
                provider.name()
            )));
        }

        let ranked = rank(query, candidates, options.sort_by, |c| provider.is_complete(c));
        for (n, r) in ranked.iter().enumerate() {
            operator.show(&listing_line(n + 1, r, options.sort_by));
        }

        if let Some(clear) = ranked
            .iter()
            .find(|r| is_clear_match(query, r, options.tolerance))
        {
            operator.show(&format!(
                "Clear {} match: {}",
                provider.name(),
                clear.candidate.describe()
            ));
            tracing::info!(provider = provider.name(), candidate = %clear.candidate.id, "Automatic match");
            let accepted = provider.accept(&clear.candidate, &market).await?;
            return Ok(LookupOutcome::Accepted(accepted));
        }

        let response = match &options.default_response {
            Some(default) => {
                operator.show(&format!(
                    "No clear {} match. Default to {default:?}:",
                    provider.name()
                ));
                default.clone()
            }
            None => {
                operator.show(&format!("No clear {} match. Select:", provider.name()));
                let answer = operator.ask(&selection_prompt(ranked.len())).await?;
                if answer.trim().is_empty() {
                    Response::Select(1)
                } else {
                    Response::parse(&answer)
                }
            }
        };

        match response {
            Response::Select(n) => match n.checked_sub(1).and_then(|i| ranked.get(i)) {
                Some(chosen) if chosen.complete => {
                    operator.show(&format!(
                        "Match accepted by {origin}: {}",
                        chosen.candidate.describe()
                    ));
                    tracing::info!(provider = provider.name(), candidate = %chosen.candidate.id, origin, "Match selected");
                    let accepted = provider.accept(&chosen.candidate, &market).await?;
                    return Ok(LookupOutcome::Accepted(accepted));
                }
                Some(_) => operator.show(&format!("Option {n} is incomplete and cannot be selected.")),
                None => operator.show(&format!("Invalid index {n} for {} options.", ranked.len())),
            },
            Response::Abort => {
                return Ok(LookupOutcome::Aborted(format!("aborted by {origin}")));
            }
            _ if options.headless() => {}
            Response::Retry => {
                operator.show(&format!("Provide new info for {} query:", provider.name()));
                let text = operator.ask(">>> Track name and artist?").await?;
                query.title = text.trim().to_string();
                query.artist.clear();
            }
            Response::Manual => {
                if let Some(accepted) = provider.manual(operator, query, &market).await? {
                    tracing::info!(provider = provider.name(), "Manual match");
                    return Ok(LookupOutcome::Accepted(accepted));
                }
            }
            Response::ChangeMarket => {
                let answer = operator.ask(">>> Market code?").await?;
                let answer = answer.trim();
                if !answer.is_empty() {
                    market = answer.to_string();
                }
                operator.show(&format!("Market changed to: {market}"));
            }
            Response::Invalid(input) => operator.show(&format!("Invalid input \"{input}\"")),
        }

        if options.headless() {
            return Ok(LookupOutcome::Aborted(format!(
                "default response {:?} did not select a match",
                options.default_response
            )));
        }
    }

    Ok(LookupOutcome::Aborted(format!(
        "no match after {} rounds",
        options.max_rounds.max(1)
    )))
}
