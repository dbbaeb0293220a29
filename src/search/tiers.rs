use once_cell::sync::Lazy;
use regex::Regex;

use super::distance::levenshtein;

/// Titles closer than this to the query are near matches.
pub const NEAR_DISTANCE: usize = 3;
/// Titles closer than this (or containing the query) are typo matches.
pub const TYPO_DISTANCE: usize = 5;

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());

/// Distinct integers in `query`, in first-seen order.
pub fn extract_numbers(query: &str) -> Vec<u64> {
    let mut numbers: Vec<u64> = Vec::new();
    for found in NUMBER_RE.find_iter(query) {
        match found.as_str().parse::<u64>() {
            Ok(n) if !numbers.contains(&n) => numbers.push(n),
            Ok(_) => {}
            Err(err) => log::debug!("skipping number {:?}: {err}", found.as_str()),
        }
    }
    numbers
}

/// A title query prepared once for every tier.
#[derive(Debug, Clone)]
pub struct TitleQuery {
    pub lower: String,
    /// `lower` with digit runs cut out and whitespace collapsed.
    pub words: String,
    pub numbers: Vec<u64>,
}

impl TitleQuery {
    pub fn new(query: &str) -> Self {
        let lower = query.to_lowercase();
        let words = NUMBER_RE
            .replace_all(&lower, " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            lower,
            words,
            numbers: extract_numbers(query),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Typo match on the query's words whose title also contains the number.
    Numeric(u64),
    Exact,
    Near,
    Typo,
}

impl Tier {
    pub fn matches(&self, title: &str, query: &TitleQuery) -> bool {
        let title = title.to_lowercase();

        match self {
            Tier::Numeric(n) => {
                typo_match(&title, &query.words) && title.contains(&n.to_string())
            }
            Tier::Exact => title == query.lower,
            Tier::Near => levenshtein(&title, &query.lower) < NEAR_DISTANCE,
            Tier::Typo => typo_match(&title, &query.lower),
        }
    }
}

fn typo_match(title: &str, query: &str) -> bool {
    title.contains(query) || levenshtein(title, query) < TYPO_DISTANCE
}
