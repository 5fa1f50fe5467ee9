//! Observability module for ctl-service.
//!
//! Provides metrics definitions and instrumentation helpers.

pub mod metrics;
