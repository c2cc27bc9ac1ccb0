//! Goal keyword extraction for knowledge lookups.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

const MIN_LEN: usize = 3;

const STOPWORDS: &[&str] = &[
    "about", "after", "all", "also", "and", "any", "are", "but", "can", "for", "from", "has",
    "have", "into", "its", "make", "more", "new", "not", "now", "one", "only", "our", "out",
    "over", "should", "some", "such", "than", "that", "the", "their", "them", "then", "there",
    "these", "this", "use", "using", "was", "were", "when", "which", "will", "with", "would",
    "you", "your",
];

/// Lower-cased topic keywords of `goal`, followed by `preferred_tags`.
///
/// Stop-words and tokens shorter than three characters are dropped.
/// Duplicates are removed and first-seen order is kept.
pub fn extract_keywords<S: AsRef<str>>(goal: &str, preferred_tags: &[S]) -> Vec<String> {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| Regex::new(r"[A-Za-z0-9][A-Za-z0-9_+#.-]*").expect("token pattern is valid"));

    let mut seen = HashSet::new();
    let words = token
        .find_iter(goal)
        .map(|m| m.as_str().trim_end_matches(['.', '-']).to_lowercase())
        .filter(|w| w.chars().count() >= MIN_LEN && !STOPWORDS.contains(&w.as_str()));
    let tags = preferred_tags
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty());

    words
        .chain(tags)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}
