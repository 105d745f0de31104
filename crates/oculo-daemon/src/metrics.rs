//! Ingestion metrics and the HTTP endpoint that exposes them.
//!
//! Counters are monotonic and read atomically, so metric scrapes never block
//! the write path. The endpoint serves three routes: `/health` (fixed OK
//! JSON), `/metrics` (Prometheus text exposition), and `/api/metrics` (the
//! same counters as JSON, consumed by `oculo status`).

use axum::body::Body;
use axum::extract::State;
use axum::http::{Response, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use oculo_core::{OculoError, Result};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// All ingestion counters, registered against a private registry so tests
/// stay deterministic.
pub struct IngestMetrics {
    registry: Registry,

    pub traces_ingested: IntCounter,
    pub spans_ingested: IntCounter,
    pub memory_events: IntCounter,
    pub error_count: IntCounter,
    pub batches_committed: IntCounter,

    uptime_seconds: IntGauge,
    started: Instant,
}

impl IngestMetrics {
    /// Create and register all collectors.
    ///
    /// # Panics
    ///
    /// Panics if registration fails — this runs once at startup, so a panic
    /// means misconfiguration.
    pub fn new() -> Self {
        let registry = Registry::new();

        let traces_ingested =
            IntCounter::new("oculo_traces_ingested_total", "Total traces ingested")
                .expect("metric: traces_ingested");
        registry
            .register(Box::new(traces_ingested.clone()))
            .expect("register traces_ingested");

        let spans_ingested = IntCounter::new("oculo_spans_ingested_total", "Total spans ingested")
            .expect("metric: spans_ingested");
        registry
            .register(Box::new(spans_ingested.clone()))
            .expect("register spans_ingested");

        let memory_events = IntCounter::new("oculo_memory_events_total", "Total memory events")
            .expect("metric: memory_events");
        registry
            .register(Box::new(memory_events.clone()))
            .expect("register memory_events");

        let error_count = IntCounter::new("oculo_errors_total", "Total errors")
            .expect("metric: error_count");
        registry
            .register(Box::new(error_count.clone()))
            .expect("register error_count");

        let batches_committed =
            IntCounter::new("oculo_batches_committed_total", "Total batches committed")
                .expect("metric: batches_committed");
        registry
            .register(Box::new(batches_committed.clone()))
            .expect("register batches_committed");

        let uptime_seconds = IntGauge::new("oculo_uptime_seconds", "Uptime in seconds")
            .expect("metric: uptime_seconds");
        registry
            .register(Box::new(uptime_seconds.clone()))
            .expect("register uptime_seconds");

        Self {
            registry,
            traces_ingested,
            spans_ingested,
            memory_events,
            error_count,
            batches_committed,
            uptime_seconds,
            started: Instant::now(),
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn gather_text(&self) -> std::result::Result<String, prometheus::Error> {
        self.uptime_seconds
            .set(self.started.elapsed().as_secs() as i64);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// A point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            traces_ingested: self.traces_ingested.get(),
            spans_ingested: self.spans_ingested.get(),
            memory_events: self.memory_events.get(),
            error_count: self.error_count.get(),
            batches_committed: self.batches_committed.get(),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON form of the ingestion counters, served at `/api/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub traces_ingested: u64,
    pub spans_ingested: u64,
    pub memory_events: u64,
    pub error_count: u64,
    pub batches_committed: u64,
    pub uptime_seconds: u64,
}

// ---------------------------------------------------------------------------
// HTTP endpoint
// ---------------------------------------------------------------------------

/// Build the metrics router.
pub fn router(metrics: Arc<IngestMetrics>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/metrics", get(api_metrics_handler))
        .with_state(metrics)
}

/// Bind and serve the metrics endpoint until the token is cancelled.
/// Returns the bound address and the server task.
pub async fn serve(
    addr: &str,
    metrics: Arc<IngestMetrics>,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| OculoError::Config(format!("binding metrics server on {addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| OculoError::Config(format!("resolving metrics address: {e}")))?;

    let app = router(metrics);
    let task = tokio::spawn(async move {
        info!(addr = %local_addr, "metrics server listening");
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "metrics server failed");
        }
    });

    Ok((local_addr, task))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn metrics_handler(State(metrics): State<Arc<IngestMetrics>>) -> Response<Body> {
    match metrics.gather_text() {
        Ok(text) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Body::from(text))
            .unwrap(),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .header("content-type", "text/plain")
            .body(Body::from(format!("failed to gather metrics: {e}")))
            .unwrap(),
    }
}

async fn api_metrics_handler(State(metrics): State<Arc<IngestMetrics>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
