//! REST handlers for ingestion, aggregate queries and operational probes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use insight_analytics::{InsightService, ServiceStats, TrackedTotals};
use insight_core::validation::{attributes_from_json, parse_timestamp};
use insight_core::{
    AttributePredicate, AttributeValue, AveragePoint, ConversionPrediction, InsightError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

type JsonObject = serde_json::Map<String, serde_json::Value>;
type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;
type JsonBody<T> = Result<Json<T>, JsonRejection>;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InsightService>,
    pub node_id: String,
    pub start_time: Instant,
}

// ─── Requests ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub user_id: String,
    pub event_name: String,
    /// RFC 3339; defaults to the time of receipt.
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackViewRequest {
    pub user_id: String,
    #[serde(default)]
    pub attributes: JsonObject,
}

#[derive(Debug, Deserialize)]
pub struct TrackBookingRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WindowSumRequest {
    pub event_name: String,
    pub window_end: String,
    pub window_hours: u32,
    #[serde(default)]
    pub predicate: Option<JsonObject>,
}

#[derive(Debug, Deserialize)]
pub struct RollingAverageRequest {
    pub event_name: String,
    /// RFC 3339; defaults to now.
    #[serde(default)]
    pub anchor: Option<String>,
    pub num_points: usize,
    #[serde(default)]
    pub window_hours: Option<u32>,
    #[serde(default)]
    pub predicate: Option<JsonObject>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversionRequest {
    /// Defaults to the configured booking event.
    #[serde(default)]
    pub book_event: Option<String>,
    #[serde(default)]
    pub anchor: Option<String>,
    #[serde(default)]
    pub window_hours: Option<u32>,
}

// ─── Responses ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct SumResponse {
    pub event_name: String,
    pub sum: u64,
}

#[derive(Debug, Serialize)]
pub struct RollingAverageResponse {
    pub event_name: String,
    pub points: Vec<AveragePoint>,
}

/// One (attribute, value) rate. Rates are returned as a flat list because values are
/// typed and `"5"` and `5` are distinct keys.
#[derive(Debug, Serialize)]
pub struct AttributeRate {
    pub attribute: String,
    pub value: AttributeValue,
    pub rate: f64,
}

#[derive(Debug, Serialize)]
pub struct ConversionRatesResponse {
    pub book_event: String,
    pub rates: Vec<AttributeRate>,
}

#[derive(Debug, Serialize)]
pub struct ConverterResponse {
    pub book_event: String,
    pub prediction: Option<ConversionPrediction>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub store: ServiceStats,
}

fn ack() -> Json<AckResponse> {
    Json(AckResponse {
        status: "ok".to_string(),
    })
}

fn reject(e: InsightError) -> ApiError {
    match e {
        InsightError::Validation(message) => {
            metrics::counter!("api.validation_errors").increment(1);
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "validation_error".to_string(),
                    message,
                }),
            )
        }
        other => {
            error!(error = %other, "Request failed");
            metrics::counter!("api.errors").increment(1);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal_error".to_string(),
                    message: "Internal processing error".to_string(),
                }),
            )
        }
    }
}

/// Unwrap a JSON body, reporting undecodable payloads as validation errors.
fn body<T>(payload: JsonBody<T>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| reject(InsightError::validation(rejection.body_text())))
}

fn instant_or_now(raw: Option<&str>) -> Result<DateTime<Utc>, InsightError> {
    raw.map_or_else(|| Ok(Utc::now()), parse_timestamp)
}

fn predicate_from(raw: Option<JsonObject>) -> Result<Option<AttributePredicate>, InsightError> {
    raw.map(attributes_from_json).transpose()
}

// ─── Ingestion ──────────────────────────────────────────────────────────

/// POST /v1/events — Record one event occurrence.
pub async fn handle_ingest(
    State(state): State<AppState>,
    payload: JsonBody<IngestRequest>,
) -> ApiResult<AckResponse> {
    let request = body(payload)?;
    let timestamp = instant_or_now(request.timestamp.as_deref()).map_err(reject)?;
    state
        .service
        .ingest(&request.user_id, &request.event_name, timestamp)
        .map_err(reject)?;
    metrics::counter!("api.ingest").increment(1);
    Ok(ack())
}

/// PUT /v1/users/:user_id/attributes — Replace a user's attributes.
pub async fn handle_set_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    payload: JsonBody<JsonObject>,
) -> ApiResult<AckResponse> {
    let raw = body(payload)?;
    let attributes = attributes_from_json(raw).map_err(reject)?;
    state
        .service
        .set_user(&user_id, attributes)
        .map_err(reject)?;
    Ok(ack())
}

/// POST /v1/track/view — Record a view now and replace the viewer's attributes.
pub async fn handle_track_view(
    State(state): State<AppState>,
    payload: JsonBody<TrackViewRequest>,
) -> ApiResult<AckResponse> {
    let request = body(payload)?;
    let attributes = attributes_from_json(request.attributes).map_err(reject)?;
    state
        .service
        .track_view(&request.user_id, attributes)
        .map_err(reject)?;
    Ok(ack())
}

/// POST /v1/track/booking — Record a booking now.
pub async fn handle_track_booking(
    State(state): State<AppState>,
    payload: JsonBody<TrackBookingRequest>,
) -> ApiResult<AckResponse> {
    let request = body(payload)?;
    state
        .service
        .track_booking(&request.user_id)
        .map_err(reject)?;
    Ok(ack())
}

// ─── Queries ────────────────────────────────────────────────────────────

/// POST /v1/query/window-sum
pub async fn handle_window_sum(
    State(state): State<AppState>,
    payload: JsonBody<WindowSumRequest>,
) -> ApiResult<SumResponse> {
    let request = body(payload)?;
    let window_end = parse_timestamp(&request.window_end).map_err(reject)?;
    let predicate = predicate_from(request.predicate).map_err(reject)?;
    let sum = state
        .service
        .window_sum(
            &request.event_name,
            window_end,
            request.window_hours,
            predicate.as_ref(),
        )
        .map_err(reject)?;
    Ok(Json(SumResponse {
        event_name: request.event_name,
        sum,
    }))
}

/// GET /v1/query/last-24h/:event_name
pub async fn handle_last_24h(
    State(state): State<AppState>,
    Path(event_name): Path<String>,
) -> Json<SumResponse> {
    let sum = state.service.last_24_hour_sum(&event_name);
    Json(SumResponse { event_name, sum })
}

/// GET /v1/query/last-24h — Views and bookings over the last 24 hours.
pub async fn handle_tracked_totals(State(state): State<AppState>) -> Json<TrackedTotals> {
    Json(state.service.tracked_totals())
}

/// POST /v1/query/rolling-average
pub async fn handle_rolling_average(
    State(state): State<AppState>,
    payload: JsonBody<RollingAverageRequest>,
) -> ApiResult<RollingAverageResponse> {
    let request = body(payload)?;
    let anchor = instant_or_now(request.anchor.as_deref()).map_err(reject)?;
    let predicate = predicate_from(request.predicate).map_err(reject)?;
    let points = state
        .service
        .rolling_average(
            &request.event_name,
            anchor,
            request.num_points,
            request.window_hours,
            predicate.as_ref(),
        )
        .map_err(reject)?;
    Ok(Json(RollingAverageResponse {
        event_name: request.event_name,
        points,
    }))
}

/// POST /v1/query/conversion-rates
pub async fn handle_conversion_rates(
    State(state): State<AppState>,
    payload: JsonBody<ConversionRequest>,
) -> ApiResult<ConversionRatesResponse> {
    let request = body(payload)?;
    let anchor = instant_or_now(request.anchor.as_deref()).map_err(reject)?;
    let book_event = request
        .book_event
        .unwrap_or_else(|| state.service.event_names().book_event.clone());
    let rates = state
        .service
        .conversion_rates(&book_event, anchor, request.window_hours)
        .map_err(reject)?;

    let rates = rates
        .into_iter()
        .flat_map(|(attribute, values)| {
            values.into_iter().map(move |(value, rate)| AttributeRate {
                attribute: attribute.clone(),
                value,
                rate,
            })
        })
        .collect();
    Ok(Json(ConversionRatesResponse { book_event, rates }))
}

/// POST /v1/query/most-likely-converter
pub async fn handle_most_likely_converter(
    State(state): State<AppState>,
    payload: JsonBody<ConversionRequest>,
) -> ApiResult<ConverterResponse> {
    let request = body(payload)?;
    let anchor = instant_or_now(request.anchor.as_deref()).map_err(reject)?;
    let book_event = request
        .book_event
        .unwrap_or_else(|| state.service.event_names().book_event.clone());
    let prediction = state
        .service
        .most_likely_converter(&book_event, anchor, request.window_hours)
        .map_err(reject)?;
    Ok(Json(ConverterResponse {
        book_event,
        prediction,
    }))
}

// ─── Operations ─────────────────────────────────────────────────────────

/// GET /health — Health check with store sizes.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        store: state.service.stats(),
    })
}

/// GET /ready — Readiness probe. The stores are in-memory, so ready once serving.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live — Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
