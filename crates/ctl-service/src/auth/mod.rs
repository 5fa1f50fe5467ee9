//! Bearer-token authentication against the identity provider's published keys.
//!
//! - `jwks` - JWKS key store with background refresh
//! - `jwt` - token validator (signature, issuer, audience, expiration, groups)
//! - `claims` - validated claims and the authenticated identity

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::{AuthenticatedUser, ValidatedClaims};
pub use jwks::{JwksHealth, JwksStore, JwksStoreOptions, KeySetStatus, VerificationKey};
pub use jwt::TokenValidator;
