// src/api.rs
//! Read-only JSON API over the record store, plus exclusion reload.
//!
//! - `GET  /health`
//! - `GET  /api/trending?limit&min_mentions`
//! - `GET  /api/ticker/{symbol}`
//! - `GET  /api/new?hours`
//! - `GET  /api/alerts?limit`
//! - `GET  /api/sources`
//! - `GET  /api/stats`
//! - `GET  /api/contracts?limit`
//! - `GET  /metrics` (when a Prometheus handle is attached)
//! - `POST /admin/reload-exclusions`

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use chrono::{Duration, Utc};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::engine::{AlertEvent, TickerStats};
use crate::ingest::pool::Endpoint;
use crate::ingest::types::Post;
use crate::metrics::Metrics;
use crate::scanner::Scanner;
use crate::store::{ContractStats, StoreSummary, TrendSnapshot};

const MAX_LIMIT: usize = 200;
const MAX_NEW_HOURS: i64 = 24 * 30;

#[derive(Clone)]
pub struct AppState {
    pub scanner: Arc<Scanner>,
}

/// Build the API router; `/metrics` is mounted when `metrics` is given.
pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let mut r = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/trending", get(trending))
        .route("/api/ticker/{symbol}", get(ticker))
        .route("/api/new", get(new_tickers))
        .route("/api/alerts", get(alerts))
        .route("/api/sources", get(sources))
        .route("/api/stats", get(stats_summary))
        .route("/api/contracts", get(contracts))
        .route("/admin/reload-exclusions", post(reload_exclusions));
    if let Some(m) = metrics {
        r = r.merge(m.router());
    }
    r.layer(CorsLayer::very_permissive()).with_state(state)
}

struct ApiError(StatusCode, String);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!(target: "api", error = %format!("{e:#}"), "request failed");
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

#[derive(Deserialize)]
struct TrendingQuery {
    limit: Option<usize>,
    min_mentions: Option<u32>,
}

async fn trending(
    State(state): State<AppState>,
    Query(q): Query<TrendingQuery>,
) -> Result<Json<Vec<TickerStats>>, ApiError> {
    let limit = q.limit.unwrap_or(20).min(MAX_LIMIT);
    let min = q
        .min_mentions
        .unwrap_or(state.scanner.config().trending.min_mentions);
    let rows = state.scanner.store().query_trending(limit, min).await?;
    Ok(Json(rows))
}

#[derive(Serialize)]
struct TickerOut {
    stats: TickerStats,
    contract: Option<ContractStats>,
    /// Per-cycle snapshots, newest first.
    history: Vec<TrendSnapshot>,
    recent_posts: Vec<Post>,
}

async fn ticker(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<TickerOut>, ApiError> {
    let store = state.scanner.store();
    let Some(stats) = store.query_ticker(&symbol).await? else {
        return Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("ticker '{symbol}' not tracked"),
        ));
    };
    let recent_posts = store.ticker_posts(&stats.ticker, 10).await?;
    let history = store.ticker_history(&stats.ticker, 24).await?;
    let contract = store.ticker_contract(&stats.ticker).await?;
    Ok(Json(TickerOut {
        stats,
        contract,
        history,
        recent_posts,
    }))
}

#[derive(Deserialize)]
struct NewQuery {
    hours: Option<i64>,
}

async fn new_tickers(
    State(state): State<AppState>,
    Query(q): Query<NewQuery>,
) -> Result<Json<Vec<TickerStats>>, ApiError> {
    let default_hours =
        (state.scanner.config().trending.new_discovery_window_secs / 3600).max(1) as i64;
    let hours = q.hours.unwrap_or(default_hours).clamp(1, MAX_NEW_HOURS);
    let rows = state
        .scanner
        .store()
        .query_new(Duration::hours(hours), Utc::now())
        .await?;
    Ok(Json(rows))
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn alerts(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<AlertEvent>>, ApiError> {
    let limit = q.limit.unwrap_or(50).min(MAX_LIMIT);
    Ok(Json(state.scanner.store().recent_alerts(limit).await?))
}

async fn stats_summary(State(state): State<AppState>) -> Result<Json<StoreSummary>, ApiError> {
    Ok(Json(state.scanner.store().summary(Utc::now()).await?))
}

async fn contracts(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<ContractStats>>, ApiError> {
    let limit = q.limit.unwrap_or(20).min(MAX_LIMIT);
    Ok(Json(state.scanner.store().query_contracts(limit).await?))
}

async fn sources(State(state): State<AppState>) -> Json<Vec<Endpoint>> {
    Json(state.scanner.pool().snapshot())
}

async fn reload_exclusions(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let n = state.scanner.reload_exclusions()?;
    Ok(Json(serde_json::json!({ "status": "reloaded", "symbols": n })))
}
