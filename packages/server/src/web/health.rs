//! Healthcheck: overall and per-source ingestion freshness.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    latest_ingestion_time: IngestionTimes,
}

#[derive(Serialize)]
struct IngestionTimes {
    /// Most recent fetch across all sources
    total: Option<DateTime<Utc>>,
    /// Per-source most recent fetch
    services: BTreeMap<String, Option<DateTime<Utc>>>,
    /// The stalest source's time
    earliest: Option<DateTime<Utc>>,
    /// The freshest source's time
    latest: Option<DateTime<Utc>>,
}

/// `GET /healthcheck`
pub async fn healthcheck(State(state): State<AppState>) -> impl IntoResponse {
    let result: Result<HealthResponse, ucti::UctiError> = async {
        let total = state.store.latest_fetched(None).await?;

        let mut services = BTreeMap::new();
        for source in state.store.sources().await? {
            let time = state.store.latest_fetched(Some(&source)).await?;
            services.insert(source, time);
        }

        let known: Vec<DateTime<Utc>> = services.values().flatten().copied().collect();
        Ok(HealthResponse {
            status: "ok".to_string(),
            latest_ingestion_time: IngestionTimes {
                total,
                earliest: known.iter().min().copied(),
                latest: known.iter().max().copied(),
                services,
            },
        })
    }
    .await;

    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "status": "error", "error": error.to_string() })),
        )
            .into_response(),
    }
}
