//! HTTP surface.
//!
//! Thin handlers over the search engine and the store; all heavy lifting
//! lives in the core library. Query parse failures surface as user-visible
//! errors (HTML message or 400 JSON), never as a 500.

pub mod health;
pub mod ioc;
pub mod rss;
pub mod search;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use ucti::search::{SearchCache, SearchEngine};
use ucti::{Config, Dirs, Store, UctiError};

const FAVICON: &str = include_str!("../../static/favicon.svg");

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: SearchEngine,
    pub store: Store,
    pub config: Arc<Config>,
}

/// `?q=` extraction shared by every search-shaped endpoint.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(search::search_page))
        .route("/search/", get(search::search_page))
        .route("/api/search", get(search::api_search))
        .route("/api/dynamic-queries", get(search::dynamic_queries))
        .route("/ioc/json/", get(ioc::ioc_json))
        .route("/ioc/csv/", get(ioc::ioc_csv))
        .route("/ioc/misp/", get(ioc::misp_redirect))
        .route("/ioc/misp/:feed/manifest.json", get(ioc::misp_manifest))
        .route("/ioc/misp/:feed/:event", get(ioc::misp_event))
        .route("/rss/", get(rss::rss_feed))
        .route("/healthcheck", get(health::healthcheck))
        .route("/favicon.svg", get(favicon))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listen: &str, store: Store, config: Config, dirs: Dirs) -> Result<()> {
    let engine = SearchEngine::new(store.clone(), SearchCache::new(&dirs.cache));
    let state = AppState {
        engine,
        store,
        config: Arc::new(config),
    };
    let app = build_router(state);

    tracing::info!(listen, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot bind {listen}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn favicon(State(_state): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/svg+xml")], FAVICON)
}

/// Map a core error onto an API status: parse problems are the caller's
/// fault, everything else is ours.
pub fn error_status(error: &UctiError) -> StatusCode {
    match error {
        UctiError::QueryParse(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Minimal HTML escaping for server-rendered pages.
pub fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Excerpt helper shared by the API and feeds: at most `limit` chars.
pub fn excerpt(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
