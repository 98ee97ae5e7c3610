//! Health Check & Metrics HTTP Server
//! Provides /health, /health/live, /health/ready, /metrics plus read-only /ledger and /tca

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use super::metrics::Metrics;
use crate::engine::ledger::Ledger;
use crate::engine::order_registry::OrderRegistry;
use crate::engine::tca::TransactionCostAnalyzer;

#[derive(Clone)]
pub struct HealthState {
    pub ledger: Arc<Ledger>,
    pub registry: Arc<OrderRegistry>,
    pub tca: Arc<TransactionCostAnalyzer>,
    pub metrics: Arc<Metrics>,
    pub nats_connected: Arc<AtomicBool>,
    pub ready: Arc<AtomicBool>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    persistence: ComponentHealth,
    nats: ComponentHealth,
    active_orders: usize,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn from_flag(ok: bool, error: &str) -> Self {
        if ok {
            Self {
                status: "healthy".to_string(),
                error: None,
            }
        } else {
            Self {
                status: "unhealthy".to_string(),
                error: Some(error.to_string()),
            }
        }
    }
}

static START_TIME: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

pub fn router(state: HealthState) -> Router {
    START_TIME.get_or_init(std::time::Instant::now);

    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .route("/ledger", get(ledger_snapshot))
        .route("/tca", get(tca_report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the health check and metrics HTTP server
#[instrument(skip(state))]
pub async fn start_health_server(port: u16, state: HealthState) -> anyhow::Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!(port = port, "Health/metrics server started");

    axum::serve(listener, app).await?;
    Ok(())
}

/// A ledger that cannot persist keeps trading in memory, so it reports
/// "degraded" rather than failing the probe.
#[instrument(skip(state))]
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    let persistence_ok = state.ledger.is_persistence_healthy();
    let nats_ok = state.nats_connected.load(Ordering::Relaxed);

    let status = match (persistence_ok, nats_ok) {
        (_, false) => "unhealthy",
        (false, true) => "degraded",
        (true, true) => "healthy",
    };

    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        checks: HealthChecks {
            persistence: ComponentHealth::from_flag(persistence_ok, "ledger state file not writable"),
            nats: ComponentHealth::from_flag(nats_ok, "NATS not connected"),
            active_orders: state.registry.active_count().await,
        },
    };

    let status_code = if nats_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
    if !state.ready.load(Ordering::Relaxed) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "reason": "initializing" })),
        );
    }

    let nats_ok = state.nats_connected.load(Ordering::Relaxed);
    if nats_ok {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "nats": nats_ok })),
        )
    }
}

async fn prometheus_metrics(State(state): State<HealthState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        state.metrics.encode(),
    )
}

async fn ledger_snapshot(State(state): State<HealthState>) -> impl IntoResponse {
    Json(state.ledger.snapshot().await)
}

async fn tca_report(State(state): State<HealthState>) -> impl IntoResponse {
    Json(state.tca.analyze().await)
}
