//! Search endpoints: HTML page, JSON API, dynamic query splitting.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use chrono::Duration;
use serde::Serialize;
use serde_json::json;
use ucti::search::{canonical_windows, SearchHit, DEFAULT_CACHE_SECONDS};
use ucti::UctiError;

use super::{error_status, excerpt, html_escape, AppState, SearchQuery};

/// Excerpt length in the JSON API.
const API_EXCERPT_CHARS: usize = 90;

#[derive(Debug, Serialize)]
struct ApiPost {
    user: String,
    source: String,
    excerpt: String,
    created: String,
    url: String,
    score: u32,
    /// md5 of source + source_id; a stable, opaque handle for consumers
    uid: String,
    tags: Vec<String>,
}

impl ApiPost {
    fn from_hit(hit: &SearchHit) -> Self {
        let post = &hit.post;
        Self {
            user: post.user.clone(),
            source: post.source.clone(),
            excerpt: excerpt(&post.content_txt, API_EXCERPT_CHARS),
            created: post.created_at.to_rfc3339(),
            url: post.url.clone(),
            score: hit.score.relevancy_score,
            uid: format!(
                "{:x}",
                md5::compute(format!("{}{}", post.source, post.source_id))
            ),
            tags: hit.tags.clone(),
        }
    }
}

/// `GET /` and `GET /search/` - server-rendered results page.
pub async fn search_page(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Html<String> {
    let started = std::time::Instant::now();
    let search_term = params.q.trim().to_string();

    let mut error = String::new();
    let mut hits: Vec<SearchHit> = Vec::new();
    if !search_term.is_empty() {
        match state
            .engine
            .search_posts(&search_term, DEFAULT_CACHE_SECONDS)
            .await
        {
            Ok(outcome) => hits = outcome.hits,
            Err(UctiError::QueryParse(message)) => error = message,
            Err(other) => {
                tracing::error!(%other, "search failed");
                error = "internal error".to_string();
            }
        }
    }

    let latest_ingestion = match state.store.latest_fetched(None).await {
        Ok(Some(time)) => time.to_rfc3339(),
        _ => "never".to_string(),
    };
    let render_ms = started.elapsed().as_millis();

    Html(render_page(&search_term, &hits, &error, &latest_ingestion, render_ms))
}

fn render_page(
    search_term: &str,
    hits: &[SearchHit],
    error: &str,
    latest_ingestion: &str,
    render_ms: u128,
) -> String {
    let mut body = String::from(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
         <title>uCTI</title>\
         <link rel=\"icon\" href=\"/favicon.svg\"></head><body>\
         <h1>uCTI</h1>\
         <form action=\"/search/\" method=\"get\">\
         <input type=\"search\" name=\"q\" value=\"",
    );
    body.push_str(&html_escape(search_term));
    body.push_str("\" placeholder=\"ransomware !age:30\"><button>Search</button></form>");

    if !error.is_empty() {
        body.push_str(&format!("<p class=\"error\">{}</p>", html_escape(error)));
    }

    body.push_str("<ul>");
    for hit in hits {
        let tags = hit
            .tags
            .iter()
            .map(|tag| html_escape(tag))
            .collect::<Vec<_>>()
            .join(" ");
        body.push_str(&format!(
            "<li><a href=\"{url}\">{content}</a><br>\
             <small>{user}@{source} · {created} · score {score} · {tags}</small></li>",
            url = html_escape(&hit.post.url),
            content = html_escape(&excerpt(&hit.post.content_txt, 300)),
            user = html_escape(&hit.post.user),
            source = html_escape(&hit.post.source),
            created = hit.post.created_at.format("%Y-%m-%d %H:%M"),
            score = hit.score.relevancy_score,
            tags = tags,
        ));
    }
    body.push_str("</ul>");

    body.push_str(&format!(
        "<footer><small>latest ingestion {latest} · rendered in {ms} ms</small></footer>\
         </body></html>",
        latest = html_escape(latest_ingestion),
        ms = render_ms,
    ));
    body
}

/// `GET /api/search?q=` - JSON results.
pub async fn api_search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> impl IntoResponse {
    match state
        .engine
        .search_posts(&params.q, DEFAULT_CACHE_SECONDS)
        .await
    {
        Ok(outcome) => {
            let posts: Vec<ApiPost> = outcome.hits.iter().map(ApiPost::from_hit).collect();
            let mut body = json!({
                "search_term": params.q,
                "posts": posts,
            });
            if let Some(back_data) = &outcome.back_data {
                body["back_data"] = json!({
                    "cnt_search": back_data.cnt_search,
                    "search_strings": back_data.search_strings,
                });
            }
            (StatusCode::OK, Json(body))
        }
        Err(error) => (
            error_status(&error),
            Json(json!({ "error": error.to_string() })),
        ),
    }
}

/// `GET /api/dynamic-queries?q=` - the query split into 7-day sub-windows,
/// earliest first, each carrying its own explicit `!from`/`!to`.
pub async fn dynamic_queries(
    State(_state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> impl IntoResponse {
    match canonical_windows(&params.q, Duration::days(7)) {
        Ok(queries) => (
            StatusCode::OK,
            Json(json!({ "search_term": params.q, "queries": queries })),
        ),
        Err(error) => (
            error_status(&error),
            Json(json!({ "error": error.to_string() })),
        ),
    }
}
