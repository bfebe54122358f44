//! IoC endpoints: JSON and CSV aggregation, plus the MISP feed.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;
use ucti::misp::generate_misp_feed;
use ucti::search::{search_iocs, IocLink, DEFAULT_CACHE_SECONDS};
use ucti::UctiError;

use super::{error_status, AppState, SearchQuery};

/// `GET /ioc/json/?q=` - aggregated indicators for a search.
pub async fn ioc_json(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> impl IntoResponse {
    match search_iocs(&state.engine, &params.q, DEFAULT_CACHE_SECONDS).await {
        Ok((iocs, _)) => (
            StatusCode::OK,
            Json(json!({ "search_term": params.q, "iocs": iocs })),
        ),
        Err(error) => (
            error_status(&error),
            Json(json!({ "error": error.to_string() })),
        ),
    }
}

/// `GET /ioc/csv/?q=` - the same aggregation as CSV.
pub async fn ioc_csv(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Response {
    let iocs = match search_iocs(&state.engine, &params.q, DEFAULT_CACHE_SECONDS).await {
        Ok((iocs, _)) => iocs,
        Err(error) => {
            return (error_status(&error), error.to_string()).into_response();
        }
    };

    match render_csv(&iocs) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response(),
    }
}

fn render_csv(iocs: &[IocLink]) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["value", "type", "subtype", "relevance", "comment", "links"])?;
    for ioc in iocs {
        let relevance = ioc.relevance.to_string();
        let links = ioc.links.join(" ");
        writer.write_record([
            ioc.value.as_str(),
            ioc.ioc_type.as_str(),
            ioc.subtype.as_deref().unwrap_or(""),
            relevance.as_str(),
            ioc.comment.as_deref().unwrap_or(""),
            links.as_str(),
        ])?;
    }
    let bytes = writer.into_inner().expect("in-memory writer");
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `GET /ioc/misp/?q=` - 302 to the feed path for this query.
pub async fn misp_redirect(
    State(_state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Response {
    let encoded = URL_SAFE_NO_PAD.encode(params.q.as_bytes());
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("/ioc/misp/{encoded}/manifest.json"))],
    )
        .into_response()
}

/// `GET /ioc/misp/<b64(q)>/manifest.json`
pub async fn misp_manifest(
    State(state): State<AppState>,
    Path(feed): Path<String>,
) -> Response {
    match build_feed(&state, &feed).await {
        Ok(feed) => Json(feed.manifest).into_response(),
        Err(response) => response,
    }
}

/// `GET /ioc/misp/<b64(q)>/<event-uuid>.json`
pub async fn misp_event(
    State(state): State<AppState>,
    Path((feed, event_file)): Path<(String, String)>,
) -> Response {
    let Some(event_uuid) = event_file.strip_suffix(".json") else {
        return (StatusCode::NOT_FOUND, "unknown feed document").into_response();
    };
    match build_feed(&state, &feed).await {
        Ok(feed) => match feed.events.get(event_uuid) {
            Some(event) => Json(event.clone()).into_response(),
            None => (StatusCode::NOT_FOUND, "unknown event").into_response(),
        },
        Err(response) => response,
    }
}

async fn build_feed(
    state: &AppState,
    encoded_query: &str,
) -> Result<ucti::misp::MispFeed, Response> {
    let query = URL_SAFE_NO_PAD
        .decode(encoded_query.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "invalid feed id").into_response())?;

    let org = match state.config.misp_org() {
        Ok(org) => org.clone(),
        Err(error) => {
            return Err((StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response())
        }
    };

    let (iocs, _) = search_iocs(&state.engine, &query, DEFAULT_CACHE_SECONDS)
        .await
        .map_err(|error: UctiError| {
            (error_status(&error), error.to_string()).into_response()
        })?;
    Ok(generate_misp_feed(&org, &iocs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ucti::types::IocType;

    #[test]
    fn csv_renders_header_and_rows() {
        let iocs = vec![IocLink {
            value: "evil.example.com".into(),
            ioc_type: IocType::Domain,
            subtype: None,
            comment: Some("c2 domain".into()),
            relevance: 77,
            links: vec!["https://a.example/1".into(), "https://b.example/2".into()],
        }];
        let csv = render_csv(&iocs).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "value,type,subtype,relevance,comment,links");
        assert!(lines[1].starts_with("evil.example.com,domain,,77,c2 domain,"));
        assert!(lines[1].contains("https://a.example/1 https://b.example/2"));
    }
}
