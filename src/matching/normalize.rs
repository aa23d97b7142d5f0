//! Metadata normalisation for automatic acceptance

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Edition noise, removed together with any of [`SECOND_WORDS`] that follows
const NOISE_WORDS: &[&str] = &[
    "remastered",
    "remaster",
    "single",
    "special",
    "radio",
    "- edit",
    "stereo",
    "digital",
];

const SECOND_WORDS: &[&str] = &[" version", " edit", " mix", "remaster", ""];

const YEAR: &str = r"(?:19|20)\d{2}";

/// One pattern per noise phrase, each swallowing an adjacent year
static NOISE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    NOISE_WORDS
        .iter()
        .flat_map(|w1| SECOND_WORDS.iter().map(move |w2| (w1, w2)))
        .filter_map(|(w1, w2)| {
            let phrase = format!("{}{}", regex::escape(w1), regex::escape(w2));
            Regex::new(&format!(
                r"\s*(?:\b{YEAR}\s*)?{phrase}(?:\s*{YEAR}\b)?"
            ))
            .ok()
        })
        .collect()
});

/// Lowercase a track name and remove edition noise
///
/// # Examples
///
/// ```
/// use web2mp3::matching::sanitize_track_name;
///
/// assert_eq!(sanitize_track_name("Bohemian Rhapsody - Remastered 2011"), "bohemian rhapsody -");
/// assert_eq!(sanitize_track_name("Song (Radio Edit)"), "song ()");
/// ```
pub fn sanitize_track_name(name: &str) -> String {
    let mut name = name.to_lowercase();
    for pattern in NOISE_PATTERNS.iter() {
        if pattern.is_match(&name) {
            name = pattern.replace_all(&name, "").into_owned();
        }
    }
    name.trim().to_string()
}

/// Strip diacritics and every non-word character, lowercased
///
/// Word characters are alphanumerics and `_`.
pub fn strip(value: &str) -> String {
    value
        .to_lowercase()
        .nfkd()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// Whether two values match after normalisation (one contains the other)
pub fn compare_meta(a: &str, b: &str) -> bool {
    let a = strip(&sanitize_track_name(a));
    let b = strip(&sanitize_track_name(b));
    a.contains(&b) || b.contains(&a)
}
