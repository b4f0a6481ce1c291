//! Liveness and readiness probes.

use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

const STORE_PING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness: the process is up and serving.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct StoreCheck {
    pub backend: &'static str,
    pub reachable: bool,
    pub latency_ms: u64,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub store: StoreCheck,
    /// Whether webhook URLs carry a signed token
    pub webhook_auth: bool,
}

/// Readiness: the story store answers within the ping timeout.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let start = Instant::now();
    let reachable = tokio::time::timeout(STORE_PING_TIMEOUT, state.pipeline.ping())
        .await
        .unwrap_or(false);

    let store = StoreCheck {
        backend: state.config.store_backend.as_str(),
        reachable,
        latency_ms: start.elapsed().as_millis() as u64,
    };
    let (code, status) = if reachable {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(ReadinessResponse {
            status,
            store,
            webhook_auth: state.pipeline.signer.is_enforced(),
        }),
    )
}
