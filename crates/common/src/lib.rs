//! Shared building blocks for the k8sctl client and server.

#![warn(clippy::pedantic)]

/// Module for JWT structure helpers (size limits, header decoding, audience shape)
pub mod jwt;

/// Module for secret types that prevent accidental logging
pub mod secret;
