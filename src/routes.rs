// Administrative HTTP boundary: the invoke actions the admin UI calls, plus
// version/liveness. JSON only; the UI layer renders elsewhere.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::error::StatsError;
use crate::models::{GRANULARITY_MINUTE, RawTimingSample, StatType, TopNEntry};
use crate::query::{StatsQuery, TimeWindow, parse_utc_ms};
use crate::stats_repo::StatsRepo;
use crate::version::{NAME, VERSION};

pub fn app(repo: Arc<StatsRepo>, query: Arc<StatsQuery>) -> Router {
    let state = AppState { repo, query };
    Router::new()
        .route("/", get(|| async { "svcstats admin API" }))
        .route("/version", get(version_handler))
        .route("/invoke/stats.get-top-n", post(get_top_n))
        .route("/invoke/stats.delete", post(delete_stats))
        .route("/invoke/stats.record-raw", post(record_raw))
        .route("/top-n/{window}", get(top_n_window))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Clone)]
struct AppState {
    repo: Arc<StatsRepo>,
    query: Arc<StatsQuery>,
}

/// Query failures come back as an empty result set plus an error indicator;
/// input problems are 400, store problems 500.
impl IntoResponse for StatsError {
    fn into_response(self) -> Response {
        let status = match &self {
            StatsError::InputValidation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "item_list": [],
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// GET /version — returns service name and version (from Cargo.toml at build time).
async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

#[derive(Debug, Deserialize)]
struct GetTopNRequest {
    start: String,
    stop: String,
    #[serde(default = "default_granularity")]
    granularity: String,
    #[serde(default = "default_n")]
    n: u32,
    /// Accepted for wire compatibility with the admin UI; the number of
    /// plotted trend elements does not change the ranking itself.
    #[serde(default)]
    #[allow(dead_code)]
    trend_elems: u32,
    stat_type: String,
}

fn default_granularity() -> String {
    "minutes".into()
}

fn default_n() -> u32 {
    10
}

/// POST /invoke/stats.get-top-n — ranked services over an explicit window.
async fn get_top_n(
    State(state): State<AppState>,
    Json(req): Json<GetTopNRequest>,
) -> Result<Json<serde_json::Value>, StatsError> {
    let start_ms = parse_utc_ms(&req.start)?;
    let stop_ms = parse_utc_ms(&req.stop)?;
    match req.granularity.as_str() {
        "minutes" | "minute" => {}
        other => {
            return Err(StatsError::InputValidation(format!(
                "granularity:[{}] is not one of:[minutes] ({}s buckets)",
                other, GRANULARITY_MINUTE
            )));
        }
    }
    let stat_type = StatType::parse(&req.stat_type)?;
    if req.n == 0 {
        return Err(StatsError::InputValidation("n must be > 0".into()));
    }

    let item_list: Vec<TopNEntry> = state
        .query
        .top_n(start_ms, stop_ms, req.n, stat_type)
        .await?;
    Ok(Json(serde_json::json!({ "item_list": item_list })))
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    start: String,
    stop: String,
}

/// POST /invoke/stats.delete — maintenance range delete. A failed delete is
/// reported, never acknowledged as success.
async fn delete_stats(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<serde_json::Value>, StatsError> {
    let start_ms = parse_utc_ms(&req.start)?;
    let stop_ms = parse_utc_ms(&req.stop)?;
    if stop_ms <= start_ms {
        return Err(StatsError::InputValidation(format!(
            "stop:[{}] must be after start:[{}]",
            req.stop, req.start
        )));
    }
    let deleted = state.repo.delete_range(start_ms, stop_ms).await?;
    tracing::info!(start = %req.start, stop = %req.stop, deleted, "statistics deleted");
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
struct RecordRawRequest {
    samples: Vec<RawTimingSample>,
}

/// POST /invoke/stats.record-raw — ingestion for request-serving components.
async fn record_raw(
    State(state): State<AppState>,
    Json(req): Json<RecordRawRequest>,
) -> Result<Json<serde_json::Value>, StatsError> {
    for s in &req.samples {
        if s.service_name.is_empty() {
            return Err(StatsError::InputValidation(
                "service_name must be non-empty".into(),
            ));
        }
        if !s.duration_ms.is_finite() || s.duration_ms < 0.0 {
            return Err(StatsError::InputValidation(format!(
                "duration_ms:[{}] must be a non-negative number",
                s.duration_ms
            )));
        }
    }
    state.repo.record_raw_times(&req.samples).await?;
    Ok(Json(serde_json::json!({ "recorded": req.samples.len() })))
}

#[derive(Debug, Deserialize)]
struct TopNWindowParams {
    #[serde(default = "default_n")]
    n: u32,
}

/// GET /top-n/{window} — named-window report (both rankings), bounds
/// resolved server-side in UTC.
async fn top_n_window(
    State(state): State<AppState>,
    Path(window): Path<String>,
    Query(params): Query<TopNWindowParams>,
) -> Result<Json<crate::query::WindowReport>, StatsError> {
    let window = TimeWindow::parse(&window)?;
    if params.n == 0 {
        return Err(StatsError::InputValidation("n must be > 0".into()));
    }
    let report = state
        .query
        .window_report(window, params.n, chrono::Utc::now())
        .await?;
    Ok(Json(report))
}
