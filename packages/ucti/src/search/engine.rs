//! Two-stage search: full-text retrieval, then token-set scoring.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{Duration, Utc};

use super::cache::SearchCache;
use super::commands::{parse_search_commands, SearchCommands, RESULTS_MAX};
use super::parser::{parse_query, Node};
use super::score::{ast_adjustment, date_penalty, tag_penalty, token_set_ratio};
use super::{search_document, BackData, PostScore, SearchHit};
use crate::error::Result;
use crate::store::{PostFilter, Store};

/// Default result-cache TTL.
pub const DEFAULT_CACHE_SECONDS: u64 = 3600;

/// Everything one search produces.
#[derive(Debug)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub commands: SearchCommands,
    /// Canonical query (explicit window); the cache key
    pub final_query: String,
    /// Present under `!debug`
    pub back_data: Option<BackData>,
    pub from_cache: bool,
}

/// Query pipeline over one store and one cache directory.
#[derive(Clone)]
pub struct SearchEngine {
    store: Store,
    cache: SearchCache,
}

impl SearchEngine {
    pub fn new(store: Store, cache: SearchCache) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    /// Run a query. `cache_seconds` is the TTL for the result cache; `0`
    /// disables both the cache read and the write.
    pub async fn search_posts(&self, query: &str, cache_seconds: u64) -> Result<SearchOutcome> {
        let (base, commands, final_query) = parse_search_commands(query)?;

        if cache_seconds > 0 {
            if let Some(hits) = self.cache.fetch(&self.store, &final_query).await? {
                tracing::debug!(query = %final_query, "cache hit");
                return Ok(SearchOutcome {
                    hits,
                    commands,
                    final_query,
                    back_data: None,
                    from_cache: true,
                });
            }
        }

        let ast = parse_query(&base)?;
        let search_strings = fan_out(&ast);

        // Stage 1: boolean-mode retrieval over the hard window.
        let (hard_earliest, hard_latest) = commands.hard_window();
        let mut candidate_ids: BTreeSet<i64> = BTreeSet::new();
        for search_string in &search_strings {
            let ids = self
                .store
                .full_text_match(
                    &fts_match_query(search_string),
                    &hard_earliest,
                    &hard_latest,
                    (RESULTS_MAX * 10) as i64,
                )
                .await?;
            candidate_ids.extend(ids);
        }

        let ids: Vec<i64> = candidate_ids.into_iter().collect();
        let posts = self
            .store
            .find_posts(&PostFilter {
                is_hidden: Some(false),
                ..PostFilter::default()
            }
            .with_ids(ids.clone()))
            .await?;
        let mut tag_map = self.store.tag_names_for_posts(&ids).await?;

        // Stage 2: scoring.
        let soft_earliest = commands.search_earliest();
        let soft_latest = commands.search_latest();
        let mut scored: Vec<(SearchHit, f64)> = Vec::new();
        for post in posts {
            let tags = tag_map.remove(&post.id).unwrap_or_default();

            let document = match &post.content_search {
                Some(document) => document.clone(),
                // First search miss materializes the document.
                None => {
                    let document = search_document(&post, &tags);
                    self.store.set_content_search(post.id, &document).await?;
                    document
                }
            };

            let base_score = search_strings
                .iter()
                .map(|s| token_set_ratio(s, &document))
                .max()
                .unwrap_or(0);
            if base_score < commands.min_score {
                continue;
            }

            let mut score = base_score as f64;
            score *= tag_penalty(tags.len());
            score *= date_penalty(&post.created_at, &soft_earliest, &soft_latest);
            if let Some(adjustment) =
                ast_adjustment(&ast, &document, &post.user, &post.source, commands.strict)
            {
                score *= adjustment;
            }
            if (score.round() as u32) < commands.min_score {
                continue;
            }

            scored.push((
                SearchHit {
                    post,
                    tags,
                    score: PostScore {
                        relevancy_score: score.round() as u32,
                        distinct_score: 0,
                    },
                },
                score,
            ));
        }

        if let Some(threshold) = commands.distinct {
            drop_duplicates(&mut scored, threshold);
        }

        scored.sort_by(|(a, score_a), (b, score_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.post.created_at.cmp(&a.post.created_at))
        });
        scored.truncate(commands.count);

        let hits: Vec<SearchHit> = scored.into_iter().map(|(hit, _)| hit).collect();

        if cache_seconds > 0 {
            let expires = Utc::now() + Duration::seconds(cache_seconds as i64);
            self.cache
                .save(&self.store, &final_query, &hits, &expires)
                .await?;
        }

        let back_data = commands.debug.then(|| BackData {
            cnt_search: search_strings.len() as u64,
            search_strings: search_strings.clone(),
        });

        Ok(SearchOutcome {
            hits,
            commands,
            final_query,
            back_data,
            from_cache: false,
        })
    }
}

/// Flatten the AST into ANDed leaf search strings: OR branches fan out into
/// separate strings, AND branches cartesian-join their children.
pub fn fan_out(node: &Node) -> Vec<String> {
    match node {
        Node::Term(term) => vec![term.clone()],
        Node::Exact(phrase) => vec![phrase.clone()],
        Node::Or(children) => children.iter().flat_map(fan_out).collect(),
        Node::And(children) => {
            let mut combined = vec![String::new()];
            for child in children {
                let branch = fan_out(child);
                combined = combined
                    .iter()
                    .flat_map(|prefix| {
                        branch.iter().map(move |suffix| {
                            if prefix.is_empty() {
                                suffix.clone()
                            } else {
                                format!("{prefix} {suffix}")
                            }
                        })
                    })
                    .collect();
            }
            combined
        }
    }
}

/// Quote every token so FTS treats the string as a plain ANDed term list.
fn fts_match_query(search_string: &str) -> String {
    search_string
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Distinct filter: oldest first, pairwise token-set similarity over the
/// plain text; the later-created member of each near-identical pair is
/// dropped and the survivor records the absorbed similarity.
fn drop_duplicates(scored: &mut Vec<(SearchHit, f64)>, threshold: u32) {
    scored.sort_by(|(a, _), (b, _)| a.post.created_at.cmp(&b.post.created_at));

    let mut dropped: HashSet<i64> = HashSet::new();
    let mut absorbed: HashMap<i64, u32> = HashMap::new();
    for i in 0..scored.len() {
        let (keeper, _) = &scored[i];
        if dropped.contains(&keeper.post.id) {
            continue;
        }
        for j in (i + 1)..scored.len() {
            let (later, _) = &scored[j];
            if dropped.contains(&later.post.id) {
                continue;
            }
            let ratio = token_set_ratio(&scored[i].0.post.content_txt, &later.post.content_txt);
            if ratio >= threshold {
                dropped.insert(scored[j].0.post.id);
                let record = absorbed.entry(scored[i].0.post.id).or_default();
                *record = (*record).max(ratio);
            }
        }
    }

    scored.retain(|(hit, _)| !dropped.contains(&hit.post.id));
    for (hit, _) in scored.iter_mut() {
        if let Some(ratio) = absorbed.get(&hit.post.id) {
            hit.score.distinct_score = *ratio;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(t: &str) -> Node {
        Node::Term(t.into())
    }

    #[test]
    fn fan_out_of_a_single_term() {
        assert_eq!(fan_out(&term("foo bar")), vec!["foo bar"]);
    }

    #[test]
    fn or_branches_fan_out() {
        let node = Node::Or(vec![term("foo"), term("bar")]);
        assert_eq!(fan_out(&node), vec!["foo", "bar"]);
    }

    #[test]
    fn and_branches_cartesian_join() {
        let node = Node::And(vec![
            term("base"),
            Node::Or(vec![term("left"), term("right")]),
        ]);
        assert_eq!(fan_out(&node), vec!["base left", "base right"]);
    }

    #[test]
    fn nested_fan_out_multiplies() {
        let node = Node::And(vec![
            Node::Or(vec![term("a"), term("b")]),
            Node::Or(vec![term("x"), term("y")]),
        ]);
        assert_eq!(fan_out(&node), vec!["a x", "a y", "b x", "b y"]);
    }

    #[test]
    fn fts_queries_quote_every_token() {
        assert_eq!(
            fts_match_query("cve-2025-1234 user:alice"),
            "\"cve-2025-1234\" \"user:alice\""
        );
    }
}
