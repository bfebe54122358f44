//! Scoring stage: token-set similarity plus query-aware adjustments.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::parser::Node;

/// Levenshtein similarity of two strings, scaled to 0..100.
fn ratio(a: &str, b: &str) -> u32 {
    (strsim::normalized_levenshtein(a, b) * 100.0).round() as u32
}

fn token_set(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .collect()
}

/// Bag-of-tokens similarity in 0..100.
///
/// Classic token-set construction: compare the sorted token intersection
/// against each side's intersection-plus-remainder and keep the best of the
/// three pairwise ratios. Insensitive to word order and to one side being a
/// superset of the other.
pub fn token_set_ratio(a: &str, b: &str) -> u32 {
    let set_a = token_set(a);
    let set_b = token_set(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0;
    }

    let intersection: Vec<&str> = set_a.intersection(&set_b).map(String::as_str).collect();
    let only_a: Vec<&str> = set_a.difference(&set_b).map(String::as_str).collect();
    let only_b: Vec<&str> = set_b.difference(&set_a).map(String::as_str).collect();

    let base = intersection.join(" ");
    let combined_a = join_nonempty(&base, &only_a.join(" "));
    let combined_b = join_nonempty(&base, &only_b.join(" "));

    ratio(&base, &combined_a)
        .max(ratio(&base, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

fn join_nonempty(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{head} {tail}"),
    }
}

/// Multiplier for posts with few tags; sparsely tagged posts rank lower.
pub fn tag_penalty(tag_count: usize) -> f64 {
    match tag_count {
        0..=2 => 0.7,
        3..=4 => 0.85,
        _ => 1.0,
    }
}

/// Multiplier for posts outside the soft window, tiered by how far outside.
pub fn date_penalty(
    created_at: &DateTime<Utc>,
    earliest: &DateTime<Utc>,
    latest: &DateTime<Utc>,
) -> f64 {
    let days_outside = if created_at < earliest {
        (*earliest - *created_at).num_days()
    } else if created_at > latest {
        (*created_at - *latest).num_days()
    } else {
        0
    };
    match days_outside {
        d if d > 180 => 0.6,
        d if d > 60 => 0.7,
        d if d > 21 => 0.8,
        d if d > 0 => 0.9,
        _ => 1.0,
    }
}

fn user_selector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)user:(\S+)").unwrap())
}

fn source_selector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)source:(\S+)").unwrap())
}

/// Walk the AST against one post and produce a multiplicative adjustment.
///
/// Exact phrases check for literal containment in the search document;
/// `user:`/`source:` selectors check case-insensitive prefixes. Plain terms
/// contribute nothing (`None`), and those nulls are dropped before OR takes
/// the max and AND the min of its children.
pub fn ast_adjustment(
    node: &Node,
    document: &str,
    user: &str,
    source: &str,
    strict: bool,
) -> Option<f64> {
    match node {
        Node::Or(children) => children
            .iter()
            .filter_map(|child| ast_adjustment(child, document, user, source, strict))
            .fold(None, |best, value| {
                Some(best.map_or(value, |b: f64| b.max(value)))
            }),
        Node::And(children) => children
            .iter()
            .filter_map(|child| ast_adjustment(child, document, user, source, strict))
            .fold(None, |worst, value| {
                Some(worst.map_or(value, |w: f64| w.min(value)))
            }),
        Node::Exact(phrase) => {
            if document.to_lowercase().contains(phrase.as_str()) {
                Some(1.0)
            } else if strict {
                Some(0.0)
            } else {
                Some(0.5)
            }
        }
        Node::Term(term) => {
            let miss = if strict { 0.0 } else { 0.3 };
            if let Some(captures) = user_selector_re().captures(term) {
                let prefix = captures[1].to_lowercase();
                return Some(if user.to_lowercase().starts_with(&prefix) {
                    1.0
                } else {
                    miss
                });
            }
            if let Some(captures) = source_selector_re().captures(term) {
                let prefix = captures[1].to_lowercase();
                return Some(if source.to_lowercase().starts_with(&prefix) {
                    1.0
                } else {
                    miss
                });
            }
            None
        }
    }
}
