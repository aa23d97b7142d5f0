//! Candidate scores and ranking

use crate::providers::{Candidate, Query};
use crate::types::SortBy;

/// Scores of one candidate against a query
#[derive(Clone, Debug, PartialEq)]
pub struct Scores {
    /// Candidate duration divided by query duration
    pub relative_duration: Option<f64>,
    /// `1 - |relative_duration - 1|`
    pub duration: Option<f64>,
    /// Case-insensitive title similarity in `[0, 1]`
    pub title: f64,
    /// `duration * title`
    pub combination: Option<f64>,
    /// Linear decay from 1.0 (first result) to 0.0 (last result)
    pub positional: f64,
}

impl Scores {
    /// Score selected by `sort_by`, with unknown scores ranked as 0
    pub fn key(&self, sort_by: SortBy) -> f64 {
        match sort_by {
            SortBy::Positional => self.positional,
            SortBy::Duration => self.duration.unwrap_or(0.0),
            SortBy::Title => self.title,
            SortBy::Combination => self.combination.unwrap_or(0.0),
        }
    }
}

/// A candidate with its scores and its position in the provider's results
#[derive(Clone, Debug)]
pub struct Ranked {
    /// Index in the provider's result list
    pub position: usize,
    /// The candidate
    pub candidate: Candidate,
    /// Its scores
    pub scores: Scores,
    /// Whether the candidate has every field needed to accept it
    pub complete: bool,
}

/// Candidate duration relative to the query's; unknown if either side is unknown
pub fn relative_duration(candidate: Option<f64>, query: Option<f64>) -> Option<f64> {
    match (candidate, query) {
        (Some(c), Some(q)) if q > 0.0 => Some(c / q),
        _ => None,
    }
}

/// `1 - |r - 1|`
///
/// # Examples
///
/// ```
/// use web2mp3::matching::duration_similarity;
///
/// assert_eq!(duration_similarity(1.0), 1.0);
/// assert_eq!(duration_similarity(0.0), 0.0);
/// assert_eq!(duration_similarity(2.0), 0.0);
/// ```
pub fn duration_similarity(relative: f64) -> f64 {
    1.0 - (relative - 1.0).abs()
}

/// Normalised Levenshtein similarity of the lowercased titles
pub fn title_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

/// Position score of result `index` out of `count`
pub fn positional_score(index: usize, count: usize) -> f64 {
    if count <= 1 {
        return 1.0;
    }
    1.0 - index as f64 / (count - 1) as f64
}

/// Score every candidate against the query
pub fn score(query: &Query, candidates: &[Candidate]) -> Vec<Scores> {
    let count = candidates.len();
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let relative = relative_duration(c.duration, query.duration);
            let duration = relative.map(duration_similarity);
            let title = title_similarity(&c.title, &query.title);
            Scores {
                relative_duration: relative,
                duration,
                title,
                combination: duration.map(|d| d * title),
                positional: positional_score(i, count),
            }
        })
        .collect()
}

/// Rank candidates descending by the selected score
///
/// The sort is stable: equal scores keep the provider's order.
pub fn rank<F>(query: &Query, candidates: Vec<Candidate>, sort_by: SortBy, is_complete: F) -> Vec<Ranked>
where
    F: Fn(&Candidate) -> bool,
{
    let scores = score(query, &candidates);
    let mut ranked: Vec<Ranked> = candidates
        .into_iter()
        .zip(scores)
        .enumerate()
        .map(|(position, (candidate, scores))| Ranked {
            position,
            complete: is_complete(&candidate),
            candidate,
            scores,
        })
        .collect();
    ranked.sort_by(|a, b| b.scores.key(sort_by).total_cmp(&a.scores.key(sort_by)));
    ranked
}
