//! HTTP routes for ctl-service.
//!
//! Defines the Axum router and application state.

use crate::auth::{JwksStore, TokenValidator};
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    /// Validator used by the auth middleware.
    pub validator: Arc<TokenValidator>,

    /// Key store, consulted by `/health`.
    pub jwks: Arc<JwksStore>,
}

/// Build the application routes.
///
/// - `/status` - liveness (public)
/// - `/health` - JWKS health, 503 when empty or degraded (public)
/// - `/metrics` - Prometheus metrics (public)
/// - `/v1/auth-check` - reports the caller's identity (authenticated)
/// - everything in `protected`, nested under `/v1` (authenticated)
///
/// `protected` is how an embedding service mounts its own endpoints behind
/// the same middleware; pass `Router::new()` when there are none.
pub fn build_routes(
    state: Arc<AppState>,
    metrics_handle: PrometheusHandle,
    protected: Router,
) -> Router {
    let auth_state = Arc::new(AuthState {
        validator: state.validator.clone(),
    });

    let public_routes = Router::new()
        .route("/status", get(handlers::status))
        .route("/health", get(handlers::health))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let v1_routes = Router::new()
        .route("/auth-check", post(handlers::auth_check))
        .merge(protected)
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees every response)
    public_routes
        .merge(metrics_routes)
        .nest("/v1", v1_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
