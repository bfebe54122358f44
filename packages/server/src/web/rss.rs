//! RSS 2.0 output for a search query.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use ucti::search::{SearchHit, DEFAULT_CACHE_SECONDS};

use super::{error_status, excerpt, AppState, SearchQuery};

/// `GET /rss/?q=` - search results as an RSS 2.0 document.
pub async fn rss_feed(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Response {
    let hits = if params.q.trim().is_empty() {
        Vec::new()
    } else {
        match state
            .engine
            .search_posts(&params.q, DEFAULT_CACHE_SECONDS)
            .await
        {
            Ok(outcome) => outcome.hits,
            Err(error) => {
                return (error_status(&error), error.to_string()).into_response();
            }
        }
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
        render_rss(&params.q, &hits),
    )
        .into_response()
}

fn render_rss(search_term: &str, hits: &[SearchHit]) -> String {
    let mut doc = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <rss version=\"2.0\"><channel>",
    );
    doc.push_str(&format!(
        "<title>uCTI - {}</title>\
         <link>/search/?q={}</link>\
         <description>Cyber-threat-intelligence search results</description>",
        xml_escape(search_term),
        xml_escape(search_term),
    ));

    for hit in hits {
        doc.push_str(&format!(
            "<item>\
             <title>{title}</title>\
             <link>{link}</link>\
             <guid isPermaLink=\"false\">{guid}</guid>\
             <author>{author}</author>\
             <pubDate>{date}</pubDate>\
             <description>{description}</description>\
             </item>",
            title = xml_escape(&excerpt(&hit.post.content_txt, 90)),
            link = xml_escape(&hit.post.url),
            guid = format!(
                "{:x}",
                md5::compute(format!("{}{}", hit.post.source, hit.post.source_id))
            ),
            author = xml_escape(&format!("{}@{}", hit.post.user, hit.post.source)),
            date = hit.post.created_at.to_rfc2822(),
            description = xml_escape(&hit.post.content_txt),
        ));
    }

    doc.push_str("</channel></rss>");
    doc
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
