//! k8sctl client error types.
//!
//! Every failure of the authentication flow is terminal for that attempt;
//! nothing here is retried automatically.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// No agent identity or key file could be located.
    #[error("no usable SSH key found (checked ssh-agent and key files)")]
    SigningUnavailable,

    /// A key was located but could not produce a signature.
    #[error("failed to sign assertion: {0}")]
    SigningFailed(String),

    /// Transport failure talking to the identity provider.
    #[error("token exchange request failed: {0}")]
    ExchangeRequestFailed(String),

    /// Non-success status from the identity provider, with its error body.
    #[error("token exchange rejected ({status}): {body}")]
    ExchangeRejected { status: u16, body: String },

    #[error("failed to parse token response: {0}")]
    ExchangeResponseUnparseable(String),

    #[error("no token received from identity provider")]
    NoTokenReceived,

    #[error("configuration error: {0}")]
    Config(String),

    /// Failure sending an authenticated request to the service.
    #[error("request failed: {0}")]
    Request(String),
}
