//! End-to-end pipeline tests: adapter output through enrichment into search.

use chrono::{Duration, Utc};
use ucti::enrich::{assign_iocs, assign_tags, filter_posts};
use ucti::oracle::Oracle;
use ucti::search::{SearchCache, SearchEngine};
use ucti::sources::persist_entry;
use ucti::store::Store;
use ucti::testing::{candidate, sample_post, MockOracle};
use ucti::types::{IocType, NewPost};

fn post_with_content(source: &str, source_id: &str, content: &str) -> NewPost {
    let mut post = sample_post(source, source_id, content);
    post.created_at = Utc::now() - Duration::hours(1);
    post
}

async fn enrich_all(store: &Store, oracle: &dyn Oracle) {
    filter_posts(store, oracle, None, false).await.unwrap();
    assign_tags(store, oracle, None).await.unwrap();
    assign_iocs(store, oracle, None).await.unwrap();
}

fn engine(store: &Store, dir: &tempfile::TempDir) -> SearchEngine {
    SearchEngine::new(store.clone(), SearchCache::new(dir.path()))
}

#[tokio::test]
async fn full_ingest_enriches_a_fresh_post() {
    let store = Store::in_memory().await.unwrap();
    let oracle = MockOracle::new()
        .with_classification(true)
        .with_tags(&["#RCE"])
        .with_iocs(vec![candidate("CVE-2025-1234", "vulnerability")]);

    let created = persist_entry(
        &store,
        post_with_content(
            "rss:foo",
            "u1",
            "New critical RCE in FooServer CVE-2025-1234 allows remote code \
             execution on every unpatched deployment, proof of concept is \
             already circulating publicly",
        ),
    )
    .await
    .unwrap()
    .unwrap();

    enrich_all(&store, &oracle).await;

    let post = store.find_post(created.id).await.unwrap().unwrap();
    assert!(post.is_ingested);
    assert!(!post.is_hidden);
    assert!(post.tags_assigned);
    assert!(post.iocs_assigned);
    assert!(post.content_search.is_some());

    let tags = store.tags_for_post(post.id).await.unwrap();
    assert!(tags.iter().any(|tag| tag.name == "#RCE"));

    let iocs = store.iocs_for_post(post.id).await.unwrap();
    assert!(iocs.iter().any(|ioc| {
        ioc.ioc_type == IocType::Vulnerability
            && ioc.subtype.is_none()
            && ioc.value == "CVE-2025-1234"
    }));
}

#[tokio::test]
async fn whitelisted_keyword_skips_the_oracle() {
    let store = Store::in_memory().await.unwrap();
    let oracle = MockOracle::new().with_classification(false);

    let created = persist_entry(
        &store,
        post_with_content("mastodon", "k1", "weekly infosec news roundup"),
    )
    .await
    .unwrap()
    .unwrap();

    filter_posts(&store, &oracle, None, false).await.unwrap();

    let post = store.find_post(created.id).await.unwrap().unwrap();
    assert!(!post.is_hidden);
    assert_eq!(oracle.classify_call_count(), 0);
}

#[tokio::test]
async fn and_query_with_age_window_finds_the_matching_post() {
    let store = Store::in_memory().await.unwrap();
    let oracle = MockOracle::new().with_classification(true);

    for (id, content) in [
        (
            "match",
            "New critical RCE in FooServer CVE-2025-1234 exploited in the wild",
        ),
        ("noise1", "quarterly earnings call for a hardware vendor"),
        ("noise2", "conference schedule announced for the spring"),
    ] {
        persist_entry(&store, post_with_content("rss:foo", id, content))
            .await
            .unwrap()
            .unwrap();
    }
    enrich_all(&store, &oracle).await;

    let dir = tempfile::tempdir().unwrap();
    let outcome = engine(&store, &dir)
        .search_posts("\"FooServer\" AND CVE-2025-1234 !age:30", 0)
        .await
        .unwrap();

    assert_eq!(outcome.hits.len(), 1);
    let hit = &outcome.hits[0];
    assert_eq!(hit.post.source_id, "match");
    assert!(hit.score.relevancy_score >= 15);

    let expected_earliest = Utc::now() - Duration::days(30);
    let drift = (outcome.commands.search_earliest() - expected_earliest).num_hours();
    assert!(drift.abs() <= 24, "earliest off by {drift} hours");
}

#[tokio::test]
async fn or_query_returns_both_disjuncts_ranked() {
    let store = Store::in_memory().await.unwrap();
    let oracle = MockOracle::new().with_classification(true);

    let older = persist_entry(
        &store,
        {
            let mut p = post_with_content("rss:a", "p1", "threat actors abuse foo in new campaign");
            p.created_at = Utc::now() - Duration::hours(10);
            p
        },
    )
    .await
    .unwrap()
    .unwrap();
    let newer = persist_entry(
        &store,
        post_with_content("rss:b", "p2", "bar malware family resurfaces with new loader"),
    )
    .await
    .unwrap()
    .unwrap();
    enrich_all(&store, &oracle).await;

    let dir = tempfile::tempdir().unwrap();
    let outcome = engine(&store, &dir)
        .search_posts("foo OR bar", 0)
        .await
        .unwrap();

    assert_eq!(outcome.hits.len(), 2);
    let ids: Vec<i64> = outcome.hits.iter().map(|hit| hit.post.id).collect();
    assert!(ids.contains(&older.id));
    assert!(ids.contains(&newer.id));
    // Equal scores rank the newer post first.
    if outcome.hits[0].score.relevancy_score == outcome.hits[1].score.relevancy_score {
        assert_eq!(outcome.hits[0].post.id, newer.id);
    }
}

#[tokio::test]
async fn distinct_filter_drops_the_later_near_duplicate() {
    let store = Store::in_memory().await.unwrap();
    let oracle = MockOracle::new().with_classification(true);

    let original = persist_entry(
        &store,
        {
            let mut p = post_with_content(
                "rss:a",
                "orig",
                "critical patch released for fooserver authentication bypass flaw",
            );
            p.created_at = Utc::now() - Duration::hours(8);
            p
        },
    )
    .await
    .unwrap()
    .unwrap();
    persist_entry(
        &store,
        post_with_content(
            "rss:b",
            "repost",
            "critical patch released for fooserver authentication bypass flaw again",
        ),
    )
    .await
    .unwrap()
    .unwrap();
    enrich_all(&store, &oracle).await;

    let dir = tempfile::tempdir().unwrap();
    let outcome = engine(&store, &dir)
        .search_posts("fooserver !distinct:95", 0)
        .await
        .unwrap();

    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].post.id, original.id);
    assert!(outcome.hits[0].score.distinct_score >= 95);
}

#[tokio::test]
async fn cached_search_bypasses_the_scoring_pipeline() {
    let store = Store::in_memory().await.unwrap();
    let oracle = MockOracle::new().with_classification(true);

    persist_entry(
        &store,
        post_with_content("rss:a", "c1", "phishing kit targets banking customers"),
    )
    .await
    .unwrap()
    .unwrap();
    enrich_all(&store, &oracle).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&store, &dir);

    let first = engine.search_posts("phishing", 3600).await.unwrap();
    assert!(!first.from_cache);
    let queries_after_first = store.fts_query_count();
    assert!(queries_after_first > 0);

    let second = engine.search_posts("phishing", 3600).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(store.fts_query_count(), queries_after_first);
    assert_eq!(second.hits, first.hits);
}

#[tokio::test]
async fn hidden_posts_never_appear_in_results() {
    let store = Store::in_memory().await.unwrap();
    let oracle = MockOracle::new().with_classification(true);

    let created = persist_entry(
        &store,
        post_with_content("rss:a", "h1", "ransomware gang leaks stolen data"),
    )
    .await
    .unwrap()
    .unwrap();
    enrich_all(&store, &oracle).await;
    store.set_hidden(created.id, true).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let outcome = engine(&store, &dir)
        .search_posts("ransomware", 0)
        .await
        .unwrap();
    assert!(outcome.hits.is_empty());
}

#[tokio::test]
async fn enrichment_stages_are_idempotent_end_to_end() {
    let store = Store::in_memory().await.unwrap();
    let oracle = MockOracle::new()
        .with_classification(true)
        .with_tags(&["#BOTNET"])
        .with_iocs(vec![candidate("203.0.113.7", "ip")]);

    let created = persist_entry(
        &store,
        post_with_content(
            "rss:a",
            "i1",
            "the botnet infrastructure keeps rotating addresses every single \
             day which makes takedown coordination between providers slow",
        ),
    )
    .await
    .unwrap()
    .unwrap();

    enrich_all(&store, &oracle).await;
    let after_first = store.find_post(created.id).await.unwrap().unwrap();
    let tags_first = store.tags_for_post(created.id).await.unwrap();
    let iocs_first = store.iocs_for_post(created.id).await.unwrap();

    enrich_all(&store, &oracle).await;
    let after_second = store.find_post(created.id).await.unwrap().unwrap();
    assert_eq!(after_first, after_second);
    assert_eq!(tags_first, store.tags_for_post(created.id).await.unwrap());
    assert_eq!(iocs_first, store.iocs_for_post(created.id).await.unwrap());
}
