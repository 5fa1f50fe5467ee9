//! ctl-service error types.
//!
//! `AuthError` names every way a request can fail authentication. `CtlError`
//! is the HTTP-facing error; its `IntoResponse` impl produces the
//! `{"error": "<reason>"}` body clients parse.
//!
//! Authentication reasons are safe to return: they name the failure kind and,
//! where useful, claim values the caller already holds. Key material and raw
//! tokens never appear in them.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Why a request was not authenticated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("invalid authorization header format")]
    MalformedAuthHeader,

    #[error("malformed token")]
    MalformedToken,

    #[error("unexpected signing method: {0}")]
    UnsupportedAlgorithm(String),

    #[error("token missing kid header")]
    MissingKeyId,

    #[error("key {0} not found in JWKS")]
    KeyNotFound(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("invalid issuer: expected {expected}, got {actual}")]
    IssuerMismatch { expected: String, actual: String },

    #[error("invalid audience: expected {expected}, got {actual:?}")]
    AudienceMismatch {
        expected: String,
        actual: Vec<String>,
    },

    #[error("missing or invalid exp claim")]
    MissingExpiration,

    #[error("token expired")]
    TokenExpired,

    #[error("token missing groups claim")]
    MissingGroupsClaim,

    #[error("user not in allowed groups (user groups: {groups:?})")]
    GroupNotAllowed { groups: Vec<String> },
}

impl AuthError {
    /// Bounded label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::MalformedAuthHeader => "malformed_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            AuthError::MissingKeyId => "missing_key_id",
            AuthError::KeyNotFound(_) => "key_not_found",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::IssuerMismatch { .. } => "issuer_mismatch",
            AuthError::AudienceMismatch { .. } => "audience_mismatch",
            AuthError::MissingExpiration => "missing_expiration",
            AuthError::TokenExpired => "token_expired",
            AuthError::MissingGroupsClaim => "missing_groups_claim",
            AuthError::GroupNotAllowed { .. } => "group_not_allowed",
        }
    }

    /// Human-readable reason returned in the 401 body.
    ///
    /// Header problems are reported as-is; everything the validator rejects is
    /// prefixed with `invalid token:`.
    pub fn reason(&self) -> String {
        match self {
            AuthError::MissingAuthHeader | AuthError::MalformedAuthHeader => self.to_string(),
            _ => format!("invalid token: {self}"),
        }
    }
}

/// ctl-service HTTP error type.
///
/// Maps to HTTP status codes:
/// - Unauthorized: 401 Unauthorized, with `WWW-Authenticate`
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum CtlError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CtlError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CtlError::Unauthorized(_) => 401,
            CtlError::Internal(_) => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for CtlError {
    fn into_response(self) -> Response {
        let (status, message, challenge) = match &self {
            CtlError::Unauthorized(err) => {
                // RFC 6750: no error code when the request carried no credentials
                let challenge = match err {
                    AuthError::MissingAuthHeader => "Bearer realm=\"k8sctl\"",
                    _ => "Bearer realm=\"k8sctl\", error=\"invalid_token\"",
                };
                (StatusCode::UNAUTHORIZED, err.reason(), Some(challenge))
            }
            CtlError::Internal(reason) => {
                // Log actual reason server-side, return generic message to client
                tracing::error!(target: "ctl.errors", reason = %reason, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                    None,
                )
            }
        };

        let mut response = (status, Json(ErrorResponse { error: message })).into_response();

        if let Some(challenge) = challenge {
            if let Ok(header_value) = challenge.parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}
