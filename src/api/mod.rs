// HTTP API routes (players, titles, goals, rankings, big-number helpers).

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use num_bigint::BigUint;
use num_traits::Num;
use serde::Deserialize;
use serde_json::json;

use crate::config::Tables;
use crate::db::Database;
use crate::error::TrackerError;
use crate::history;
use crate::metrics;
use crate::poller::{PollOutcome, PollTrigger};
use crate::ranking::{self, RankingMetric};
use crate::title;

/// Longest history window a client may ask for.
const MAX_HISTORY_DAYS: i64 = 365;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct HistoryParams {
    pub days: Option<i64>,
}

#[derive(Deserialize)]
pub struct ParseRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct FormatRequest {
    /// Decimal digits.
    pub value: String,
    #[serde(default)]
    pub truncate_fractions: bool,
    #[serde(default)]
    pub truncate_zero_fractions: bool,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub tables: Arc<Tables>,
    pub lookback: chrono::Duration,
    /// Absent when polling is disabled.
    pub poller: Option<Arc<dyn PollTrigger>>,
}

// ── Error helpers ─────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn internal_error(e: sqlx::Error) -> impl IntoResponse {
    tracing::error!("Database error: {e}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn tracker_error(e: TrackerError) -> impl IntoResponse {
    tracing::error!("Request failed: {e}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn player_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "Player not found").into_response()
}

/// 404 unless the player has at least one snapshot, in any window.
async fn require_player(state: &AppState, name: &str) -> Result<(), Response> {
    match state.db.latest_snapshot(name).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(player_not_found()),
        Err(e) => Err(internal_error(e).into_response()),
    }
}

fn parse_metric(name: &str) -> Result<RankingMetric, Response> {
    RankingMetric::from_str_name(name).ok_or_else(|| {
        json_error(
            StatusCode::BAD_REQUEST,
            "metric must be one of soul_eggs, earnings_bonus, mer, jer",
        )
        .into_response()
    })
}

fn history_days(params: &HistoryParams, default: i64) -> i64 {
    params.days.unwrap_or(default).clamp(1, MAX_HISTORY_DAYS)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        // Players
        .route("/api/players", get(list_players))
        .route("/api/players/{name}", get(get_player))
        .route("/api/players/{name}/history", get(get_history))
        .route("/api/players/{name}/title", get(get_title))
        .route("/api/players/{name}/growth", get(get_growth))
        .route("/api/players/{name}/goals/{metric}", get(get_goals))
        // Rankings
        .route("/api/rankings/{metric}", get(get_ranking))
        .route("/api/rankings/{metric}/deltas", get(get_ranking_deltas))
        // Big-number helpers
        .route("/api/parse", post(parse_number))
        .route("/api/format", post(format_number))
        // Polling
        .route("/api/poll", post(trigger_poll))
        .layer(axum::middleware::from_fn(track_requests))
        .with_state(state)
}

/// Count and time every request by normalized path.
async fn track_requests(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = metrics::normalize_path(req.uri().path());
    let started = Instant::now();

    let response = next.run(req).await;

    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint.as_str()])
        .observe(started.elapsed().as_secs_f64());
    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), endpoint.as_str(), response.status().as_str()])
        .inc();
    response
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "eggtracker-backend" }))
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

// ── Player handlers ───────────────────────────────────────────────────

async fn list_players(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.list_players().await {
        Ok(players) => (StatusCode::OK, Json(json!(players))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_player(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    match state.db.latest_snapshot(&name).await {
        Ok(Some(snapshot)) => (StatusCode::OK, Json(json!(snapshot))).into_response(),
        Ok(None) => player_not_found(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    let days = history_days(&params, state.lookback.num_days());
    let now = Utc::now();
    let from = history::window_start(now, chrono::Duration::days(days));
    let rows = match state.db.history(&name, from, now).await {
        Ok(rows) => rows,
        Err(e) => return internal_error(e).into_response(),
    };
    if rows.is_empty() {
        if let Err(resp) = require_player(&state, &name).await {
            return resp;
        }
    }
    (StatusCode::OK, Json(json!(rows))).into_response()
}

async fn get_title(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let latest = match state.db.latest_snapshot(&name).await {
        Ok(Some(s)) => s,
        Ok(None) => return player_not_found(),
        Err(e) => return internal_error(e).into_response(),
    };

    let now = Utc::now();
    let history = match state.db.history(&name, history::window_start(now, state.lookback), now).await {
        Ok(rows) => rows,
        Err(e) => return internal_error(e).into_response(),
    };

    match title::evaluate(
        &state.tables.suffixes,
        &state.tables.titles,
        &latest,
        &history,
        now,
        state.lookback,
    ) {
        Ok(report) => (StatusCode::OK, Json(json!(report))).into_response(),
        Err(e) => tracker_error(e.into()).into_response(),
    }
}

async fn get_growth(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    let days = history_days(&params, state.lookback.num_days());
    let lookback = chrono::Duration::days(days);
    let now = Utc::now();
    let rows = match state.db.history(&name, history::window_start(now, lookback), now).await {
        Ok(rows) => rows,
        Err(e) => return internal_error(e).into_response(),
    };
    if rows.is_empty() {
        if let Err(resp) = require_player(&state, &name).await {
            return resp;
        }
    }

    let growth = history::growth(&state.tables.suffixes, &rows, now, lookback);
    (
        StatusCode::OK,
        Json(json!({ "player_name": name, "days": days, "growth": growth })),
    )
        .into_response()
}

async fn get_goals(
    State(state): State<AppState>,
    Path((name, metric)): Path<(String, String)>,
) -> impl IntoResponse {
    let metric = match parse_metric(&metric) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    let latest = match state.db.latest_snapshot(&name).await {
        Ok(Some(s)) => s,
        Ok(None) => return player_not_found(),
        Err(e) => return internal_error(e).into_response(),
    };

    let value = metric.snapshot_value(&latest);
    let neighbors = match state
        .db
        .surrounding(&state.tables.suffixes, &name, metric, value)
        .await
    {
        Ok(n) => n,
        Err(e) => return internal_error(e).into_response(),
    };
    let progress = ranking::goal_progress(&state.tables.suffixes, &neighbors, metric, value);

    (
        StatusCode::OK,
        Json(json!({
            "player_name": name,
            "metric": metric,
            "value": value,
            "lower": neighbors.lower,
            "upper": neighbors.upper,
            "progress": progress,
        })),
    )
        .into_response()
}

// ── Ranking handlers ──────────────────────────────────────────────────

async fn get_ranking(State(state): State<AppState>, Path(metric): Path<String>) -> impl IntoResponse {
    let metric = match parse_metric(&metric) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    match state.db.latest_ranking(metric).await {
        Ok(entries) => (StatusCode::OK, Json(json!(entries))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_ranking_deltas(
    State(state): State<AppState>,
    Path(metric): Path<String>,
) -> impl IntoResponse {
    let metric = match parse_metric(&metric) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    let current = match state.db.latest_ranking(metric).await {
        Ok(rows) => rows,
        Err(e) => return internal_error(e).into_response(),
    };
    let previous = match state.db.previous_ranking(metric).await {
        Ok(rows) => rows,
        Err(e) => return internal_error(e).into_response(),
    };
    let deltas = ranking::rank_deltas(&previous, &current);
    (StatusCode::OK, Json(json!(deltas))).into_response()
}

// ── Big-number helpers ────────────────────────────────────────────────

async fn parse_number(State(state): State<AppState>, Json(req): Json<ParseRequest>) -> impl IntoResponse {
    match state.tables.suffixes.try_parse(&req.text) {
        Ok(value) => (StatusCode::OK, Json(json!({ "value": value }))).into_response(),
        // Display values degrade to 0; the reason is reported alongside.
        Err(e) => (
            StatusCode::OK,
            Json(json!({ "value": 0.0, "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn format_number(State(state): State<AppState>, Json(req): Json<FormatRequest>) -> impl IntoResponse {
    let value = match BigUint::from_str_radix(req.value.trim(), 10) {
        Ok(v) => v,
        Err(_) => {
            return json_error(StatusCode::BAD_REQUEST, "value must be a non-negative integer")
                .into_response()
        }
    };
    match state
        .tables
        .suffixes
        .format(&value, req.truncate_fractions, req.truncate_zero_fractions)
    {
        Ok(text) => (StatusCode::OK, Json(json!({ "text": text }))).into_response(),
        Err(e) => tracker_error(e.into()).into_response(),
    }
}

// ── Polling ───────────────────────────────────────────────────────────

async fn trigger_poll(State(state): State<AppState>) -> impl IntoResponse {
    let Some(poller) = state.poller.clone() else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "Polling is disabled").into_response();
    };
    match poller.trigger().await {
        Ok(outcome @ PollOutcome::Completed { .. }) => {
            (StatusCode::OK, Json(json!(outcome))).into_response()
        }
        Ok(PollOutcome::Skipped) => {
            (StatusCode::CONFLICT, Json(json!(PollOutcome::Skipped))).into_response()
        }
        Err(e) => {
            tracing::error!("Triggered poll failed: {e}");
            json_error(StatusCode::BAD_GATEWAY, "Snapshot source poll failed").into_response()
        }
    }
}
