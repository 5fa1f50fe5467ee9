//! JWT structure helpers shared by the assertion signer and the token validator.
//!
//! Nothing in this module verifies a signature. It only answers structural
//! questions about a compact JWS (`header.payload.signature`):
//!
//! - Is it small enough to bother parsing?
//! - What signing algorithm and key identifier does the header claim?
//! - How is an `aud` claim shaped (single string or list)?
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE any base64 decoding
//! - Only asymmetric algorithms map to a [`jsonwebtoken::Algorithm`]; `HS*`
//!   and `none` are never accepted for verification
//! - Header values are untrusted input and are only used to select a key

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted JWT size in bytes (8KB).
///
/// Dex identity tokens carrying a groups claim are typically 800-2000 bytes.
/// Anything larger than this is rejected before decoding.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

// =============================================================================
// Error Types
// =============================================================================

/// Structural problems with a compact JWT.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtStructureError {
    /// Token exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("token exceeds maximum size")]
    TokenTooLarge,

    /// Token is not three base64url segments with a JSON object header.
    #[error("malformed token")]
    MalformedToken,
}

// =============================================================================
// Header
// =============================================================================

/// The parts of a JOSE header this workspace cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtHeader {
    /// Raw `alg` value as written by the issuer.
    pub alg: String,

    /// Key identifier. `None` when absent, empty, or not a string.
    pub kid: Option<String>,

    /// Token type, usually `JWT`.
    pub typ: Option<String>,
}

impl JwtHeader {
    /// The verification algorithm, if `alg` names an asymmetric one.
    #[must_use]
    pub fn asymmetric_algorithm(&self) -> Option<Algorithm> {
        asymmetric_algorithm(&self.alg)
    }
}

/// Decode the JOSE header of a compact JWT without verifying anything.
///
/// # Errors
///
/// - `TokenTooLarge` if the token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` if the token is not three segments, the header is not
///   base64url, not a JSON object, or has no string `alg`
pub fn decode_header(token: &str) -> Result<JwtHeader, JwtStructureError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtStructureError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: not a three-part JWS");
        return Err(JwtStructureError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtStructureError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtStructureError::MalformedToken
    })?;

    let alg = header
        .get("alg")
        .and_then(serde_json::Value::as_str)
        .ok_or(JwtStructureError::MalformedToken)?
        .to_string();

    let kid = header
        .get("kid")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    let typ = header
        .get("typ")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string);

    Ok(JwtHeader { alg, kid, typ })
}

/// Map an `alg` header value to an asymmetric verification algorithm.
///
/// Returns `None` for HMAC algorithms, `none`, and anything unrecognised.
#[must_use]
pub fn asymmetric_algorithm(alg: &str) -> Option<Algorithm> {
    match alg {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        "EdDSA" => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Serialize a value as JSON and base64url-encode it (no padding).
///
/// Used to build the `header.payload` signing input of a JWS.
///
/// # Errors
///
/// Returns the serialization error if `value` cannot be encoded as JSON.
pub fn encode_segment<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

// =============================================================================
// Audience
// =============================================================================

/// The `aud` claim, which RFC 7519 allows as a string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "https://svc.example.com"`
    Single(String),
    /// `"aud": ["https://svc.example.com", "other"]`
    Many(Vec<String>),
}

impl Audience {
    /// Membership test: does this claim name `audience`?
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|a| a == audience),
        }
    }

    /// All audience values as a slice-like vector.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Audience::Single(aud) => vec![aud.as_str()],
            Audience::Many(auds) => auds.iter().map(String::as_str).collect(),
        }
    }
}
