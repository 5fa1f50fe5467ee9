//! Status and health handlers.
//!
//! - `/status`: liveness; answers as long as the process is serving
//! - `/health`: readiness; reflects whether the JWKS key set is usable

use crate::auth::{JwksHealth, KeySetStatus};
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: KeySetStatus,
    pub jwks: JwksHealth,
}

/// Liveness probe. Does not check dependencies.
pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

/// Readiness probe.
///
/// Returns 200 while the key set is healthy. An empty key set (nothing ever
/// loaded) or a degraded one (last success too old) returns 503 so the pod
/// is taken out of rotation; the body carries the same report either way.
#[tracing::instrument(skip_all, name = "ctl.health")]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let jwks = state.jwks.health().await;
    let status_code = health_status_code(jwks.status);

    if status_code != StatusCode::OK {
        tracing::warn!(
            target: "ctl.health",
            status = ?jwks.status,
            consecutive_failures = jwks.consecutive_failures,
            "Health check failing"
        );
    }

    (
        status_code,
        Json(HealthResponse {
            status: jwks.status,
            jwks,
        }),
    )
}

fn health_status_code(status: KeySetStatus) -> StatusCode {
    match status {
        KeySetStatus::Healthy => StatusCode::OK,
        KeySetStatus::Empty | KeySetStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    }
}
