//! HTTP API for samples, health, load tests and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use monitor_lib::{LoadGenError, LoadGenerator, LoadPhase, MonitorMetrics, Sample};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

const HEALTH_MESSAGE: &str = "GC Monitor is running";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Latest sample published by the sampling loop
    pub latest: watch::Receiver<Option<Sample>>,
    /// `None` in monitor-only mode
    pub load_generator: Option<LoadGenerator>,
    pub metrics: MonitorMetrics,
}

impl AppState {
    pub fn new(
        latest: watch::Receiver<Option<Sample>>,
        load_generator: Option<LoadGenerator>,
        metrics: MonitorMetrics,
    ) -> Self {
        Self {
            latest,
            load_generator,
            metrics,
        }
    }
}

/// Load generator status response
#[derive(Debug, Serialize)]
pub struct LoadTestStatus {
    pub active: bool,
    pub phase: LoadPhase,
}

/// Latest sample, or the zero-valued record before the first tick
async fn metrics(State(state): State<Arc<AppState>>) -> Json<Sample> {
    let sample = state.latest.borrow().clone().unwrap_or_default();
    Json(sample)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, HEALTH_MESSAGE)
}

/// Start a load run - returns 200 if started, 409 if one is already active
async fn start_load_test(State(state): State<Arc<AppState>>) -> Response {
    let Some(generator) = &state.load_generator else {
        return (StatusCode::NOT_FOUND, "Load testing is disabled").into_response();
    };

    match generator.start() {
        Ok(handle) => {
            info!("Load test started via API");
            // Detached: the run continues in the background
            drop(handle);
            (StatusCode::OK, "Load test started").into_response()
        }
        Err(LoadGenError::AlreadyRunning) => {
            (StatusCode::CONFLICT, "Load test already running").into_response()
        }
        Err(e) => {
            warn!(error = %e, "Failed to start load test");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn load_test_status(State(state): State<Arc<AppState>>) -> Response {
    match &state.load_generator {
        Some(generator) => Json(LoadTestStatus {
            active: generator.is_active(),
            phase: generator.phase(),
        })
        .into_response(),
        None => (StatusCode::NOT_FOUND, "Load testing is disabled").into_response(),
    }
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode Prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/prometheus", get(prometheus_metrics));

    if state.load_generator.is_some() {
        router = router
            .route("/loadtest", get(start_load_test).post(start_load_test))
            .route("/loadtest/status", get(load_test_status));
    }

    router.with_state(state)
}

/// Start the API server on `0.0.0.0:port`
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = TcpListener::bind(&addr).await?;
    serve_listener(listener, state, shutdown).await
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve_listener<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
