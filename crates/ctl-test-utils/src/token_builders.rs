//! Builder patterns for test data construction
//!
//! Provides a fluent API for the claims of identity tokens as the identity
//! provider would issue them after a token exchange.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for creating identity-token claims
///
/// Defaults to a token that passes validation for `(issuer, audience)` with
/// groups `["engineering"]`, expiring in ten minutes.
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new("https://dex.example.com", "https://svc.example.com")
///     .for_subject("alice")
///     .with_groups(&["engineering", "sre"])
///     .expires_in(600)
///     .build();
/// ```
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults
    pub fn new(issuer: &str, audience: &str) -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(issuer));
        claims.insert("aud".to_string(), json!(audience));
        claims.insert("sub".to_string(), json!("CgVhbGljZRIDc3No"));
        claims.insert("email".to_string(), json!("alice@example.com"));
        claims.insert("groups".to_string(), json!(["engineering"]));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(600)).timestamp()),
        );

        Self { claims }
    }

    /// Set the subject
    pub fn for_subject(self, subject: &str) -> Self {
        self.with_claim("sub", json!(subject))
    }

    /// Set the email claim
    pub fn with_email(self, email: &str) -> Self {
        self.with_claim("email", json!(email))
    }

    /// Set the groups claim to a list of strings
    pub fn with_groups(self, groups: &[&str]) -> Self {
        self.with_claim("groups", json!(groups))
    }

    /// Set the audience claim to a list of strings
    pub fn with_audiences(self, audiences: &[&str]) -> Self {
        self.with_claim("aud", json!(audiences))
    }

    /// Set the issuer claim
    pub fn with_issuer(self, issuer: &str) -> Self {
        self.with_claim("iss", json!(issuer))
    }

    /// Set expiration in seconds from now (negative for an expired token)
    pub fn expires_in(self, seconds: i64) -> Self {
        let exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("exp", json!(exp))
    }

    /// Set or replace an arbitrary claim
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim entirely
    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}
