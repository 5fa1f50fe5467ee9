//! # k8sctl client
//!
//! Establishes trust with the k8sctl service using the caller's SSH key:
//!
//! 1. [`signer`] mints a short-lived JWT assertion signed by `ssh-agent` or
//!    an unencrypted key file, addressed to the identity provider.
//! 2. [`exchange`] trades it at the identity provider's token endpoint for an
//!    identity token whose audience is the target service.
//! 3. [`session`] attaches that token to requests against the service.
//!
//! Settings come from flags, environment and an optional cluster mapping
//! file ([`config`]).

pub mod config;
pub mod errors;
pub mod exchange;
pub mod session;
pub mod signer;

pub use config::{ClientOverrides, ClientSettings};
pub use errors::ClientError;
pub use session::{authenticate, AuthenticatedClient};
