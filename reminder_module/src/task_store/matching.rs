//! Tolerant description matching shared by tasks, lists and list items.

use regex::Regex;
use std::sync::LazyLock;

static SCHEDULE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@[a-z]+(?:\s+\d{1,2}(?::\d{2})?\s*(?:am|pm)?)?").expect("schedule tag regex")
});
static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("parenthetical regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Lowercase, unify apostrophes, drop `@day time` tags and parenthetical
/// annotations, collapse whitespace.
pub fn normalize_description(raw: &str) -> String {
    let lowered = raw
        .to_lowercase()
        .replace(['\u{2019}', '\u{2018}', '`', '\u{00b4}'], "'");
    let without_tags = SCHEDULE_TAG.replace_all(&lowered, " ");
    let without_notes = PARENTHETICAL.replace_all(&without_tags, " ");
    WHITESPACE
        .replace_all(without_notes.trim(), " ")
        .trim_matches(|ch: char| ch.is_whitespace() || matches!(ch, '.' | ',' | '!' | '?'))
        .to_string()
}

/// Either normalized string contains the other.
pub fn descriptions_match(query: &str, candidate: &str) -> bool {
    let query = normalize_description(query);
    let candidate = normalize_description(candidate);
    normalized_match(&query, &candidate)
}

pub(crate) fn normalized_match(query: &str, candidate: &str) -> bool {
    if query.is_empty() || candidate.is_empty() {
        return false;
    }
    candidate.contains(query) || query.contains(candidate)
}
