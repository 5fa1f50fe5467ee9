//! # k8sctl Test Utilities
//!
//! Shared test utilities for the k8sctl client and the `ctl-service` server.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (Ed25519 from a seed, fixed RSA and P-256 keys,
//!   OpenSSH private keys for the assertion signer)
//! - Identity-token claim builders (`TestTokenBuilder`)
//! - A mock identity provider serving `/token` and `/.well-known/jwks.json`
//! - Custom assertions for signed SSH assertions (`TokenAssertions`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ctl_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let idp = MockIdentityProvider::start().await;
//!     let key = TestKeypair::new(1, "dex-key-1");
//!     idp.mount_jwks(&[key.jwk_json()]).await;
//!
//!     let claims = TestTokenBuilder::new(&idp.issuer(), "https://svc.example.com")
//!         .for_subject("alice")
//!         .with_groups(&["engineering"])
//!         .build();
//!     let token = key.sign_token(&claims);
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod mock_idp;
pub mod ssh_fixtures;
pub mod token_builders;

// Re-export commonly used items
pub use assertions::*;
pub use crypto_fixtures::*;
pub use mock_idp::*;
pub use ssh_fixtures::*;
pub use token_builders::*;
