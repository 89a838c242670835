//! HTTP surface: the agent feed plus health, debug and metrics endpoints.

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus_client::encoding::text::encode;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use watchpost::Engine;

use crate::metrics::ServerMetrics;
use crate::output;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub metrics: Arc<ServerMetrics>,
}

/// Build the router with all routes attached.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(agent_output))
        .route("/healthcheck", get(healthcheck))
        .route("/executor/statistics", get(executor_statistics))
        .route("/executor/errored", get(executor_errored))
        .route("/metrics", get(metrics_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, listen: &str) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state);
    let listener = TcpListener::bind(listen).await?;
    info!(listen, "Watchpost server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// `GET /` - one poll, streamed as Checkmk piggyback text.
///
/// Always 200: check failures are encoded in the body as UNKNOWN services.
async fn agent_output(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let results = state.engine.poll().await;
    state.metrics.record_poll(started.elapsed(), &results);

    let chunks = output::render_chunks(&results);
    let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// `GET /healthcheck` - liveness only.
async fn healthcheck() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `GET /executor/statistics`
async fn executor_statistics(State(state): State<AppState>) -> Response {
    Json(state.engine.executor().statistics()).into_response()
}

#[derive(Serialize)]
struct ErroredEntry {
    key: String,
    error: String,
    at: String,
}

/// `GET /executor/errored` - the bounded buffer of recent failures.
async fn executor_errored(State(state): State<AppState>) -> Response {
    let entries: Vec<ErroredEntry> = state
        .engine
        .executor()
        .errored_snapshot()
        .into_iter()
        .map(|job| ErroredEntry {
            key: job.key.to_string(),
            error: job.error,
            at: DateTime::<Utc>::from(job.occurred_at).to_rfc3339(),
        })
        .collect();
    Json(entries).into_response()
}

/// `GET /metrics` - Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    state
        .metrics
        .update_executor(state.engine.executor().statistics());

    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &state.metrics.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
