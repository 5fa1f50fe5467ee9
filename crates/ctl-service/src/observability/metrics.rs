//! Metrics definitions for ctl-service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `ctl_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for durations
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods
//! - `endpoint`: the fixed route set plus `/other`
//! - `outcome`: `success` or an `AuthError::kind()` label
//! - `status`: `success` / `error` (JWKS refresh)
//!
//! Token subjects, emails and key ids never appear as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("ctl_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Validation is local crypto only; sub-millisecond buckets matter
        .set_buckets_for_metric(
            Matcher::Prefix("ctl_token_validation".to_string()),
            &[
                0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050,
            ],
        )
        .map_err(|e| format!("Failed to set token validation buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `ctl_http_requests_total`, `ctl_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("ctl_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("ctl_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path onto the fixed route set.
///
/// Anything else (including protected routes mounted by embedders) becomes
/// `/other` to bound cardinality.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/status" => "/status",
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/v1/auth-check" => "/v1/auth-check",
        _ => "/other",
    }
}

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record the outcome of one bearer-token check.
///
/// Metric: `ctl_token_validations_total`, `ctl_token_validation_duration_seconds`
/// Labels: `outcome` (`success` or an `AuthError::kind()` value)
pub fn record_token_validation(outcome: &'static str, duration: Duration) {
    histogram!("ctl_token_validation_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());

    counter!("ctl_token_validations_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// JWKS Metrics
// ============================================================================

/// Record a JWKS refresh attempt.
///
/// Metric: `ctl_jwks_refresh_total` (labels: `status`), `ctl_jwks_keys`
///
/// `key_count` is only set on success; a failed refresh leaves the gauge at
/// the size of the last-known-good set.
pub fn record_jwks_refresh(status: &'static str, key_count: Option<usize>) {
    counter!("ctl_jwks_refresh_total", "status" => status).increment(1);

    if let Some(count) = key_count {
        #[allow(clippy::cast_precision_loss)]
        gauge!("ctl_jwks_keys").set(count as f64);
    }
}

/// Metric: `ctl_jwks_last_success_age_seconds`
pub fn set_jwks_last_success_age(age: Duration) {
    gauge!("ctl_jwks_last_success_age_seconds").set(age.as_secs_f64());
}
