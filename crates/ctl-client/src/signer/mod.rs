//! Key-backed assertion signer.
//!
//! Mints the short-lived JWT the identity provider's SSH connector accepts
//! as proof of identity. The assertion is signed with an SSH private key held
//! by `ssh-agent` or read from an unencrypted key file; the key itself never
//! leaves this process (or the agent).
//!
//! Both `iss` and `aud` are the identity-provider URL. The service audience
//! is only requested later, during the token exchange.

#[cfg(unix)]
pub mod agent;
pub mod keyfile;

use crate::errors::ClientError;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use common::jwt::encode_segment;
use common::secret::SecretString;
use serde::Serialize;
use std::path::PathBuf;
use tracing::instrument;

/// Assertion lifetime.
pub const ASSERTION_LIFETIME_SECONDS: i64 = 300;

/// JWT algorithms an SSH key can sign with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    /// Ed25519 keys.
    EdDSA,
    /// RSA keys, PKCS#1 v1.5 with SHA-256.
    RS256,
}

impl SigningAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            SigningAlgorithm::EdDSA => "EdDSA",
            SigningAlgorithm::RS256 => "RS256",
        }
    }
}

/// A private key able to sign an assertion.
#[async_trait]
pub trait AssertionKey: Send + Sync {
    fn algorithm(&self) -> SigningAlgorithm;

    /// `SHA256:<base64>` fingerprint of the public key, as `ssh-keygen -l` prints it.
    fn key_id(&self) -> &str;

    /// Sign `signing_input` and return the base64url-encoded JWS signature.
    async fn sign(&self, signing_input: &str) -> Result<String, ClientError>;
}

#[derive(Debug, Serialize)]
struct AssertionHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    kid: &'a str,
}

/// Claims of the SSH assertion.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AssertionClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

impl AssertionClaims {
    pub fn new(username: &str, identity_provider: &str, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: identity_provider.to_string(),
            aud: identity_provider.to_string(),
            sub: username.to_string(),
            iat,
            nbf: iat,
            exp: iat + ASSERTION_LIFETIME_SECONDS,
            jti: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// A freshly minted assertion. Never persisted or reused.
#[derive(Debug)]
pub struct SignedAssertion {
    pub token: SecretString,
    pub key_id: String,
    pub expires_at: i64,
}

/// Sign `claims` with `key` into a compact JWT.
///
/// # Errors
///
/// Returns `ClientError::SigningFailed` if encoding or signing fails.
pub async fn sign_claims(
    key: &dyn AssertionKey,
    claims: &AssertionClaims,
) -> Result<SignedAssertion, ClientError> {
    let header = AssertionHeader {
        alg: key.algorithm().as_str(),
        typ: "JWT",
        kid: key.key_id(),
    };

    let header = encode_segment(&header).map_err(|e| ClientError::SigningFailed(e.to_string()))?;
    let payload = encode_segment(claims).map_err(|e| ClientError::SigningFailed(e.to_string()))?;
    let signing_input = format!("{header}.{payload}");

    let signature = key.sign(&signing_input).await?;

    Ok(SignedAssertion {
        token: SecretString::from(format!("{signing_input}.{signature}")),
        key_id: key.key_id().to_string(),
        expires_at: claims.exp,
    })
}

/// Finds a usable SSH key and signs assertions with it.
#[derive(Debug, Clone)]
pub struct AssertionSigner {
    key_paths: Vec<PathBuf>,
    agent_socket: Option<PathBuf>,
}

/// Outcome of trying to use one key source.
pub(crate) enum Probe {
    Found(Box<dyn AssertionKey>),
    /// A key of a type that cannot sign assertions, e.g. ECDSA.
    Unsupported(String),
    /// A supported key type whose material cannot be used.
    Unusable(String),
    Missing,
}

impl AssertionSigner {
    /// `agent_socket` is consulted first, then each key file in order.
    pub fn new(key_paths: Vec<PathBuf>, agent_socket: Option<PathBuf>) -> Self {
        Self {
            key_paths,
            agent_socket,
        }
    }

    /// Signer for resolved client settings. Explicit key paths disable the agent.
    pub fn from_settings(settings: &crate::config::ClientSettings) -> Self {
        let agent_socket = if settings.explicit_keys {
            None
        } else {
            settings.agent_socket.clone()
        };
        Self::new(settings.ssh_key_paths.clone(), agent_socket)
    }

    /// Mint an assertion for `username`, addressed to `identity_provider`.
    ///
    /// # Errors
    ///
    /// - `ClientError::SigningUnavailable` if no key could be located
    /// - `ClientError::SigningFailed` if the only keys found are unsupported or
    ///   unusable,
    ///   or the chosen key fails to sign
    #[instrument(skip_all)]
    pub async fn sign(
        &self,
        username: &str,
        identity_provider: &str,
    ) -> Result<SignedAssertion, ClientError> {
        let key = self.locate_key().await?;

        tracing::debug!(
            target: "client.signer",
            key_id = %key.key_id(),
            alg = key.algorithm().as_str(),
            "Signing assertion"
        );

        let claims = AssertionClaims::new(username, identity_provider, Utc::now());
        sign_claims(key.as_ref(), &claims).await
    }

    async fn locate_key(&self) -> Result<Box<dyn AssertionKey>, ClientError> {
        let mut failures = Vec::new();
        let mut record = |probe: Probe| match probe {
            Probe::Found(key) => Some(key),
            Probe::Unsupported(kind) => {
                failures.push(format!("unsupported key type: {kind}"));
                None
            }
            Probe::Unusable(reason) => {
                failures.push(reason);
                None
            }
            Probe::Missing => None,
        };

        if let Some(key) = record(self.probe_agent().await) {
            return Ok(key);
        }
        for path in &self.key_paths {
            if let Some(key) = record(keyfile::FileKey::load(path)) {
                return Ok(key);
            }
        }

        if failures.is_empty() {
            Err(ClientError::SigningUnavailable)
        } else {
            Err(ClientError::SigningFailed(failures.join("; ")))
        }
    }

    #[cfg(unix)]
    async fn probe_agent(&self) -> Probe {
        match &self.agent_socket {
            Some(socket) => agent::AgentKey::connect(socket).await,
            None => Probe::Missing,
        }
    }

    #[cfg(not(unix))]
    async fn probe_agent(&self) -> Probe {
        Probe::Missing
    }
}

pub(crate) fn encode_signature(signature: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(signature)
}
