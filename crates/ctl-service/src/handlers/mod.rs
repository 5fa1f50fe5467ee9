//! HTTP request handlers for ctl-service.

pub mod auth_check;
pub mod health;
pub mod metrics;

pub use auth_check::auth_check;
pub use health::{health, status};
pub use metrics::metrics_handler;
