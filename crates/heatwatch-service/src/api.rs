//! REST API endpoints.
//!
//! All analytics endpoints take optional `start` and `end` query parameters
//! in RFC 3339 format. A missing `end` means now; a missing `start` means a
//! per-endpoint span before `end`. Both bounds are inclusive.
//!
//! # Lock Acquisition
//!
//! Handlers take the store mutex for the duration of one query and never
//! hold it across an await on anything else. The engine shares the same
//! mutex, so long queries delay ingestion.
//!
//! # Error Handling
//!
//! Errors are returned as `{"error": "..."}` via [`AppError`]. Malformed or
//! inverted time ranges are 400, store failures are 500.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcOffset};

use heatwatch_core::EngineState;
use heatwatch_store::{
    PeriodStatistics, ReadingQuery, StoredAlert, StoredCooling, StoredReading, hour_start,
};
use heatwatch_types::{DailyRollup, HourlyRollup, Period};

use crate::state::AppState;

/// Maximum rows returned by `/temperature/range`.
pub const MAX_RANGE_READINGS: u32 = 5000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/analytics/temperature/latest", get(latest_temperature))
        .route("/api/analytics/temperature/range", get(temperature_range))
        .route("/api/analytics/alerts", get(alerts))
        .route("/api/analytics/cooling", get(cooling))
        .route("/api/analytics/statistics", get(statistics))
        .route("/api/analytics/hourly", get(hourly))
        .route("/api/analytics/daily", get(daily))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status, including the engine's current view of the world.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub uptime_seconds: u64,
    pub engine_running: bool,
    pub engine: EngineState,
    /// Connected live-feed subscribers.
    pub live_subscribers: usize,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let now = OffsetDateTime::now_utc();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        started_at: state.started_at,
        uptime_seconds: (now - state.started_at).whole_seconds().max(0) as u64,
        engine_running: state.engine.is_running(),
        engine: state.engine.state(),
        live_subscribers: state.live.receiver_count(),
    })
}

/// `start`/`end` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl RangeQuery {
    /// Resolve to a period, defaulting to `span` before `end`.
    pub fn period(&self, span: Duration) -> Result<Period, AppError> {
        let end = match &self.end {
            Some(end) => parse_time("end", end)?,
            None => OffsetDateTime::now_utc(),
        };
        let start = match &self.start {
            Some(start) => parse_time("start", start)?,
            None => end - span,
        };
        Period::new(start, end).map_err(|e| AppError::BadRequest(e.to_string()))
    }
}

fn parse_time(name: &str, value: &str) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map(|t| t.to_offset(UtcOffset::UTC))
        .map_err(|_| {
            AppError::BadRequest(format!(
                "Invalid '{name}' value '{value}': expected RFC 3339, e.g. 2024-05-01T10:00:00Z"
            ))
        })
}

async fn latest_temperature(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StoredReading>, AppError> {
    let store = state.store.lock().await;
    let reading = store
        .latest_reading()?
        .ok_or_else(|| AppError::NotFound("No temperature readings found".to_string()))?;
    Ok(Json(reading))
}

#[derive(Debug, Serialize)]
pub struct RangeResponse {
    pub period: Period,
    pub readings: Vec<StoredReading>,
}

async fn temperature_range(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<RangeResponse>, AppError> {
    let period = params.period(Duration::days(1))?;
    let query = ReadingQuery::new()
        .since(period.start)
        .until(period.end)
        .oldest_first()
        .limit(MAX_RANGE_READINGS);

    let readings = state.store.lock().await.query_readings(&query)?;
    Ok(Json(RangeResponse { period, readings }))
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub period: Period,
    pub alerts: Vec<StoredAlert>,
}

async fn alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<AlertsResponse>, AppError> {
    let period = params.period(Duration::days(7))?;
    let alerts = state.store.lock().await.alerts_between(&period)?;
    Ok(Json(AlertsResponse { period, alerts }))
}

#[derive(Debug, Serialize)]
pub struct CoolingResponse {
    pub period: Period,
    pub events: Vec<StoredCooling>,
}

async fn cooling(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<CoolingResponse>, AppError> {
    let period = params.period(Duration::days(7))?;
    let events = state.store.lock().await.cooling_between(&period)?;
    Ok(Json(CoolingResponse { period, events }))
}

async fn statistics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<PeriodStatistics>, AppError> {
    let period = params.period(Duration::days(7))?;
    let threshold = state.engine.state().threshold;
    let stats = state.store.lock().await.statistics(&period, threshold)?;
    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
pub struct AggregatesResponse<T> {
    pub period: Period,
    pub aggregates: Vec<T>,
}

/// Hourly rollups whose hour overlaps the period.
async fn hourly(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<AggregatesResponse<HourlyRollup>>, AppError> {
    let period = params.period(Duration::days(1))?;
    let rows = state
        .store
        .lock()
        .await
        .hourly_rollups_between(period.start.date(), period.end.date())?;

    let mut aggregates = Vec::with_capacity(rows.len());
    for row in rows {
        let bucket_start = hour_start(row.date, row.hour)?;
        if bucket_start <= period.end && bucket_start + Duration::HOUR > period.start {
            aggregates.push(row);
        }
    }
    Ok(Json(AggregatesResponse { period, aggregates }))
}

/// Daily rollups for every UTC date the period touches.
async fn daily(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<AggregatesResponse<DailyRollup>>, AppError> {
    let period = params.period(Duration::days(30))?;
    let aggregates = state
        .store
        .lock()
        .await
        .daily_rollups_between(period.start.date(), period.end.date())?;
    Ok(Json(AggregatesResponse { period, aggregates }))
}

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] heatwatch_store::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Store(e) => {
                tracing::error!(error = %e, "Store query failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
