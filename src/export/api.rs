//! Frame recomputation over HTTP.
//!
//! Every request rebuilds the frame sequence from the shared immutable
//! store on the blocking pool. Parameters the query leaves out come from the
//! configured default view.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::health::HealthMetrics;
use super::{render, LabelZone};
use crate::heatmap::{HeatmapError, RecordStore, ViewParams};

/// Shared state for the API handlers.
pub struct ApiState {
    pub store: Arc<RecordStore>,
    pub defaults: ViewParams,
    pub zone: LabelZone,
    pub metrics: Arc<HealthMetrics>,
}

/// Raw query of `GET /api/frames`. Values are parsed by hand so bad input
/// yields a JSON error body.
#[derive(Debug, Default, Deserialize)]
pub struct FramesQuery {
    pub dimension: Option<String>,
    pub metric: Option<String>,
    /// Comma-separated status codes.
    pub status: Option<String>,
    pub select_all: Option<String>,
    pub value_mode: Option<String>,
    pub range_mode: Option<String>,
    pub lower: Option<String>,
    pub upper: Option<String>,
}

impl FramesQuery {
    /// Overlays the query on `defaults`.
    pub fn resolve(&self, defaults: &ViewParams) -> Result<ViewParams, String> {
        let mut view = defaults.clone();

        if let Some(v) = non_empty(&self.dimension) {
            view.dimension = v.parse()?;
        }
        if let Some(v) = non_empty(&self.metric) {
            view.metric = v.parse()?;
        }
        if let Some(v) = &self.status {
            view.status_codes = parse_status_list(v);
        }
        if let Some(v) = non_empty(&self.select_all) {
            view.select_all = v
                .parse()
                .map_err(|_| format!("select_all must be true or false, got {v}"))?;
        }
        if let Some(v) = non_empty(&self.value_mode) {
            view.value_mode = v.parse()?;
        }
        if let Some(v) = non_empty(&self.range_mode) {
            view.range_mode = v.parse()?;
        }
        if let Some(v) = non_empty(&self.lower) {
            view.lower = parse_threshold("lower", v)?;
        }
        if let Some(v) = non_empty(&self.upper) {
            view.upper = parse_threshold("upper", v)?;
        }

        Ok(view)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_status_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_threshold(name: &str, value: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("{name} must be a finite number, got {value}"))
}

/// Router serving `/api/frames` and `/api/status-codes`.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/frames", get(frames_handler))
        .route("/api/status-codes", get(status_codes_handler))
        .with_state(state)
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// GET /api/frames - recomputed frame sequence.
async fn frames_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<FramesQuery>,
) -> Response {
    let view = match query.resolve(&state.defaults) {
        Ok(view) => view,
        Err(message) => {
            state.metrics.record_request("invalid");
            return error_body(StatusCode::BAD_REQUEST, message);
        }
    };

    let started = Instant::now();
    let task_state = Arc::clone(&state);
    let result =
        tokio::task::spawn_blocking(move || render(&task_state.store, &view, task_state.zone))
            .await;
    state
        .metrics
        .recompute_duration
        .observe(started.elapsed().as_secs_f64());

    match result {
        Ok(Ok(seq)) => {
            state.metrics.record_request("ok");
            state.metrics.frames_rendered.inc_by(seq.frames.len() as f64);
            (StatusCode::OK, Json(seq)).into_response()
        }
        Ok(Err(e @ HeatmapError::MetricNotFound { .. })) => {
            state.metrics.record_request("not_found");
            error_body(StatusCode::NOT_FOUND, e.to_string())
        }
        Ok(Err(e)) => {
            state.metrics.record_request("invalid");
            error_body(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "frame recompute task failed");
            state.metrics.record_request("error");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "recompute failed".to_string())
        }
    }
}

/// GET /api/status-codes - distinct status codes of the window.
async fn status_codes_handler(State(state): State<Arc<ApiState>>) -> Json<Vec<String>> {
    Json(
        state
            .store
            .status_codes()
            .iter()
            .map(|c| c.to_string())
            .collect(),
    )
}
