//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for the SSH-signed assertions the client
//! mints before a token exchange. Signatures are NOT checked here; tests that
//! care verify them against the fixture's public key.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde_json::Value;

/// Custom assertions for compact JWTs
///
/// # Example
/// ```rust,ignore
/// assertion
///     .assert_valid_jwt("EdDSA")
///     .assert_signed_by(SSH_ED25519_FINGERPRINT)
///     .assert_for_subject("alice")
///     .assert_audience("https://dex.example.com")
///     .assert_expires_within(300);
/// ```
pub trait TokenAssertions {
    /// Assert three base64url segments, JSON header and payload, and the given `alg`
    fn assert_valid_jwt(&self, alg: &str) -> &Self;

    /// Assert the header `kid`
    fn assert_signed_by(&self, key_id: &str) -> &Self;

    /// Assert the `sub` claim
    fn assert_for_subject(&self, subject: &str) -> &Self;

    /// Assert both `iss` and `aud` equal `url`
    fn assert_audience(&self, url: &str) -> &Self;

    /// Assert `exp` is in the future and at most `seconds` away
    fn assert_expires_within(&self, seconds: i64) -> &Self;
}

/// Decode the header of a compact JWT.
pub fn jwt_header(token: &str) -> Value {
    decode_segment(token, 0)
}

/// Decode the payload of a compact JWT.
pub fn jwt_claims(token: &str) -> Value {
    decode_segment(token, 1)
}

fn decode_segment(token: &str, index: usize) -> Value {
    let segment = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT has no segment {index}"));
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .unwrap_or_else(|e| panic!("JWT segment {index} is not base64url: {e}"));
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("JWT segment {index} is not JSON: {e}"))
}

impl<S: AsRef<str>> TokenAssertions for S {
    fn assert_valid_jwt(&self, alg: &str) -> &Self {
        let token: &str = self.as_ref();
        assert_eq!(
            token.split('.').count(),
            3,
            "JWT must have 3 parts (header.payload.signature)"
        );

        let header = jwt_header(token);
        assert_eq!(header["alg"], alg, "Unexpected JWT algorithm");
        assert_eq!(header["typ"], "JWT", "Expected JWT type");

        let claims = jwt_claims(token);
        assert!(claims.is_object(), "JWT payload must be a JSON object");

        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header = jwt_header(self.as_ref());
        assert_eq!(header["kid"], key_id, "Token signed by unexpected key");
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        let claims = jwt_claims(self.as_ref());
        assert_eq!(claims["sub"], subject, "Token has unexpected subject");
        self
    }

    fn assert_audience(&self, url: &str) -> &Self {
        let claims = jwt_claims(self.as_ref());
        assert_eq!(claims["iss"], url, "Assertion issuer must be the identity provider");
        assert_eq!(claims["aud"], url, "Assertion audience must be the identity provider");
        self
    }

    fn assert_expires_within(&self, seconds: i64) -> &Self {
        let claims = jwt_claims(self.as_ref());
        let exp = claims["exp"].as_i64().expect("exp must be an integer");
        let now = Utc::now().timestamp();

        assert!(exp > now, "Token already expired");
        assert!(
            exp <= now + seconds,
            "Token expires in {}s, expected at most {}s",
            exp - now,
            seconds
        );
        self
    }
}
