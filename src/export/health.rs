use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::loader::LoadReport;

const NAMESPACE: &str = "heatgrid";

/// Prometheus metrics and the HTTP server that exposes them.
///
/// All metrics use the "heatgrid" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Snapshot files decoded successfully.
    pub files_loaded: Counter,
    /// Snapshot files skipped as malformed.
    pub files_skipped: Counter,
    /// Records held by the store.
    pub records_loaded: Gauge,
    /// Frame requests by outcome (ok, not_found, invalid, error).
    pub requests_total: CounterVec,
    /// Time spent recomputing a frame sequence (1ms-5s buckets).
    pub recompute_duration: Histogram,
    /// Frames produced across all requests.
    pub frames_rendered: Counter,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let files_loaded = Counter::with_opts(
            Opts::new(
                "snapshot_files_loaded_total",
                "Snapshot files decoded successfully.",
            )
            .namespace(NAMESPACE),
        )?;
        let files_skipped = Counter::with_opts(
            Opts::new(
                "snapshot_files_skipped_total",
                "Snapshot files skipped because they could not be read.",
            )
            .namespace(NAMESPACE),
        )?;
        let records_loaded = Gauge::with_opts(
            Opts::new("records_loaded", "Counter records held in memory.").namespace(NAMESPACE),
        )?;
        let requests_total = CounterVec::new(
            Opts::new("frame_requests_total", "Frame requests by outcome.").namespace(NAMESPACE),
            &["outcome"],
        )?;
        let recompute_duration = Histogram::with_opts(
            HistogramOpts::new(
                "recompute_duration_seconds",
                "Time spent recomputing a frame sequence.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        let frames_rendered = Counter::with_opts(
            Opts::new("frames_rendered_total", "Frames produced across all requests.")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(files_loaded.clone()))?;
        registry.register(Box::new(files_skipped.clone()))?;
        registry.register(Box::new(records_loaded.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(recompute_duration.clone()))?;
        registry.register(Box::new(frames_rendered.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            files_loaded,
            files_skipped,
            records_loaded,
            requests_total,
            recompute_duration,
            frames_rendered,
        })
    }

    /// Records the outcome of a snapshot load.
    pub fn record_load(&self, report: &LoadReport) {
        self.files_loaded.inc_by(report.files_loaded as f64);
        self.files_skipped.inc_by(report.files_skipped as f64);
        self.records_loaded.set(report.records as f64);
    }

    /// Counts one frame request by outcome.
    pub fn record_request(&self, outcome: &str) {
        self.requests_total.with_label_values(&[outcome]).inc();
    }

    /// Router serving /metrics and /healthz.
    pub fn router(&self) -> Router {
        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state)
    }

    /// Starts the HTTP server with the health routes merged into `api`.
    ///
    /// Returns the bound address.
    pub async fn start(&self, api: Router) -> Result<SocketAddr> {
        // Parse address, handling ":port" shorthand.
        let bind_addr = if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        };

        let app = api.merge(self.router());

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "heatgrid server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "heatgrid server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding metrics".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "converting metrics".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
