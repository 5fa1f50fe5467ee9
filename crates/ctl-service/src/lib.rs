//! ctl-service library
//!
//! Server side of k8sctl trust establishment: a JWKS key store kept fresh in
//! the background, a validator for identity-provider tokens, and the axum
//! middleware that guards every protected route.
//!
//! Exposed as a library so integration tests (and embedding services) can
//! build the router with their own protected endpoints.

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
