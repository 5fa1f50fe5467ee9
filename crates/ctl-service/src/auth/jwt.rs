//! Token validation for ctl-service.
//!
//! Validates identity tokens issued by the identity provider using the keys
//! held by the [`JwksStore`].
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only asymmetric algorithms are accepted; the key's family must match `alg`
//! - Every gate is hard: no partially validated claims are ever returned
//! - Expiration is checked first among the claims: an expired token is
//!   reported as expired whatever else is wrong with it
//! - No network I/O: keys come from the store's current snapshot

use crate::auth::claims::{RawClaims, ValidatedClaims};
use crate::auth::jwks::JwksStore;
use crate::config::AuthConfig;
use crate::errors::AuthError;
use common::jwt::{decode_header, JwtStructureError};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Validation};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

/// Validates bearer tokens against an [`AuthConfig`] policy.
///
/// Holds no global state; several validators with different policies can
/// share one key store.
pub struct TokenValidator {
    config: AuthConfig,
    keys: Arc<JwksStore>,
}

impl TokenValidator {
    pub fn new(config: AuthConfig, keys: Arc<JwksStore>) -> Self {
        Self { config, keys }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Validate a bearer token and return its claims.
    ///
    /// # Gates, in order
    ///
    /// 1. Structure and size; `alg` must be asymmetric
    /// 2. `kid` present in the header
    /// 3. Key present in the current key set
    /// 4. Signature verifies with that key
    /// 5. `exp` present, numeric, not passed (plus configured leeway)
    /// 6. `iss` equals the configured issuer exactly
    /// 7. `aud` (string or list) contains the configured audience
    /// 8. `groups` intersects the allow-list, when the allow-list is non-empty
    ///
    /// # Errors
    ///
    /// Returns the `AuthError` of the first gate that fails.
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<ValidatedClaims, AuthError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(target: "ctl.auth.jwt", error = %e, "Token header rejected");
            match e {
                JwtStructureError::TokenTooLarge | JwtStructureError::MalformedToken => {
                    AuthError::MalformedToken
                }
            }
        })?;

        let algorithm = header.asymmetric_algorithm().ok_or_else(|| {
            tracing::debug!(target: "ctl.auth.jwt", alg = %header.alg, "Unsupported signing algorithm");
            AuthError::UnsupportedAlgorithm(header.alg.clone())
        })?;

        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;

        let key = self.keys.get_key(&kid).await?;

        if !key.accepts(algorithm) {
            tracing::warn!(
                target: "ctl.auth.jwt",
                kid = %kid,
                alg = ?algorithm,
                family = ?key.family,
                "Token algorithm does not match key"
            );
            return Err(AuthError::InvalidSignature);
        }

        // Signature only; every claim is checked explicitly below.
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let raw = decode::<RawClaims>(token, &key.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(target: "ctl.auth.jwt", error = %e, "Token verification failed");
                match e.kind() {
                    ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_)
                    | ErrorKind::InvalidToken => AuthError::MalformedToken,
                    _ => AuthError::InvalidSignature,
                }
            })?
            .claims;

        self.check_claims(raw)
    }

    fn check_claims(&self, raw: RawClaims) -> Result<ValidatedClaims, AuthError> {
        let expiration = raw.expiration().ok_or(AuthError::MissingExpiration)?;
        let now = chrono::Utc::now().timestamp();
        let leeway = i64::try_from(self.config.clock_skew_seconds).unwrap_or(i64::MAX);
        if now > expiration.saturating_add(leeway) {
            tracing::debug!(target: "ctl.auth.jwt", exp = expiration, now, "Token expired");
            return Err(AuthError::TokenExpired);
        }

        let issuer = raw.issuer().unwrap_or_default();
        if issuer != self.config.issuer_url {
            return Err(AuthError::IssuerMismatch {
                expected: self.config.issuer_url.clone(),
                actual: issuer.to_string(),
            });
        }

        let audience = match raw.audience() {
            Some(aud) if aud.contains(&self.config.audience) => aud,
            other => {
                return Err(AuthError::AudienceMismatch {
                    expected: self.config.audience.clone(),
                    actual: other
                        .map(|a| a.values().into_iter().map(ToString::to_string).collect())
                        .unwrap_or_default(),
                });
            }
        };

        let groups = raw.groups();
        if !self.config.allowed_groups.is_empty() {
            let user_groups = groups.as_ref().ok_or(AuthError::MissingGroupsClaim)?;
            let allowed = user_groups
                .iter()
                .any(|g| self.config.allowed_groups.iter().any(|a| a == g));
            if !allowed {
                return Err(AuthError::GroupNotAllowed {
                    groups: user_groups.clone(),
                });
            }
        }

        tracing::debug!(target: "ctl.auth.jwt", "Token validated successfully");

        Ok(ValidatedClaims {
            issuer: issuer.to_string(),
            audience,
            expiration,
            subject: raw.subject(),
            email: raw.email(),
            groups,
        })
    }
}
