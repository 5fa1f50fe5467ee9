//! JWKS key store with background refresh.
//!
//! Fetches the identity provider's public signing keys from
//! `{issuer}/.well-known/jwks.json` and keeps them in memory for the token
//! validator. A background task refreshes the set on a fixed interval.
//!
//! # Security
//!
//! - Fail closed: if the initial fetch fails the store starts EMPTY and every
//!   signature check fails until a refresh succeeds
//! - A failed refresh keeps the last-known-good set; once it is older than
//!   `max_stale_intervals` refresh intervals, health reports it degraded
//! - Readers take an `Arc` snapshot; a refresh swaps the whole set under a
//!   short write lock that is never held across I/O
//! - Only asymmetric keys are loaded (RSA, EC P-256/P-384, Ed25519)

use crate::errors::AuthError;
use crate::observability::metrics;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// JWKS refresh and staleness settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwksStoreOptions {
    /// Time between background refreshes.
    pub refresh_interval: Duration,

    /// Timeout for a single JWKS fetch.
    pub http_timeout: Duration,

    /// A key set older than this many refresh intervals is degraded.
    pub max_stale_intervals: u32,
}

impl Default for JwksStoreOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(3600),
            http_timeout: Duration::from_secs(10),
            max_stale_intervals: 3,
        }
    }
}

/// Why a refresh did not replace the key set.
#[derive(Debug, Error)]
pub enum JwksError {
    #[error("JWKS fetch failed: {0}")]
    Fetch(String),

    #[error("JWKS endpoint returned HTTP {0}")]
    Status(u16),

    #[error("JWKS document could not be parsed: {0}")]
    Parse(String),

    #[error("JWKS document contained no usable signing keys")]
    NoUsableKeys,
}

/// JSON Web Key as published by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type: "RSA", "EC" or "OKP".
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm the key is intended for (optional in RFC 7517).
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use; only "sig" (or absent) is loaded.
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Curve: "P-256", "P-384" or "Ed25519".
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate or Ed25519 public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

/// Key family, which bounds the algorithms a key may verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EcP256,
    EcP384,
    Ed25519,
}

impl KeyFamily {
    fn supports(self, alg: Algorithm) -> bool {
        match self {
            KeyFamily::Rsa => matches!(
                alg,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            KeyFamily::EcP256 => alg == Algorithm::ES256,
            KeyFamily::EcP384 => alg == Algorithm::ES384,
            KeyFamily::Ed25519 => alg == Algorithm::EdDSA,
        }
    }
}

/// A public key ready for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: String,
    pub family: KeyFamily,
    /// Pinned algorithm when the JWK declared one.
    pub algorithm: Option<Algorithm>,
    pub decoding_key: DecodingKey,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Whether a token signed with `alg` may be verified with this key.
    pub fn accepts(&self, alg: Algorithm) -> bool {
        match self.algorithm {
            Some(pinned) => pinned == alg,
            None => self.family.supports(alg),
        }
    }

    /// Build a verification key from a JWK.
    ///
    /// Returns a description of the problem for keys that cannot be used.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, String> {
        let kid = jwk
            .kid
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or("missing kid")?
            .to_string();

        if let Some(key_use) = jwk.key_use.as_deref() {
            if key_use != "sig" {
                return Err(format!("key use '{key_use}' is not 'sig'"));
            }
        }

        let algorithm = match jwk.alg.as_deref() {
            Some(alg) => Some(
                common::jwt::asymmetric_algorithm(alg)
                    .ok_or_else(|| format!("algorithm '{alg}' is not supported"))?,
            ),
            None => None,
        };

        let (family, decoding_key) = match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk.n.as_deref().ok_or("RSA key missing n")?;
                let e = jwk.e.as_deref().ok_or("RSA key missing e")?;
                let key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|err| format!("invalid RSA components: {err}"))?;
                (KeyFamily::Rsa, key)
            }
            "EC" => {
                let family = match jwk.crv.as_deref() {
                    Some("P-256") => KeyFamily::EcP256,
                    Some("P-384") => KeyFamily::EcP384,
                    other => return Err(format!("EC curve {other:?} is not supported")),
                };
                let x = jwk.x.as_deref().ok_or("EC key missing x")?;
                let y = jwk.y.as_deref().ok_or("EC key missing y")?;
                let key = DecodingKey::from_ec_components(x, y)
                    .map_err(|err| format!("invalid EC components: {err}"))?;
                (family, key)
            }
            "OKP" => {
                if jwk.crv.as_deref() != Some("Ed25519") {
                    return Err(format!("OKP curve {:?} is not supported", jwk.crv));
                }
                let x = jwk.x.as_deref().ok_or("OKP key missing x")?;
                let key = DecodingKey::from_ed_components(x)
                    .map_err(|err| format!("invalid Ed25519 key: {err}"))?;
                (KeyFamily::Ed25519, key)
            }
            other => return Err(format!("key type '{other}' is not supported")),
        };

        if let Some(alg) = algorithm {
            if !family.supports(alg) {
                return Err(format!("algorithm {alg:?} does not match key type"));
            }
        }

        Ok(Self {
            kid,
            family,
            algorithm,
            decoding_key,
        })
    }
}

/// Complete key set as of one successful fetch.
struct KeySnapshot {
    keys: HashMap<String, VerificationKey>,
    /// `None` until the first successful fetch.
    fetched_at: Option<Instant>,
}

/// Health of the key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySetStatus {
    /// Loaded and refreshed within the staleness budget.
    Healthy,
    /// No keys: never loaded, or the provider published an empty set.
    Empty,
    /// Last successful refresh is older than the staleness budget.
    Degraded,
}

/// Point-in-time key store health, served by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct JwksHealth {
    pub status: KeySetStatus,
    pub key_count: usize,
    pub last_success_age_seconds: Option<u64>,
    pub consecutive_failures: u64,
}

/// JWKS key store.
///
/// Construct with [`JwksStore::start`] in production. [`JwksStore::new`]
/// builds an idle, empty store for callers that drive refreshes themselves.
pub struct JwksStore {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,

    options: JwksStoreOptions,

    /// Current key set. Replaced whole, never mutated in place.
    current: RwLock<Arc<KeySnapshot>>,

    consecutive_failures: AtomicU64,

    /// Stops the background refresh task.
    cancel_token: CancellationToken,

    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl JwksStore {
    /// Create an empty store without fetching or spawning anything.
    pub fn new(jwks_url: String, options: JwksStoreOptions) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(options.http_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "ctl.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            options,
            current: RwLock::new(Arc::new(KeySnapshot {
                keys: HashMap::new(),
                fetched_at: None,
            })),
            consecutive_failures: AtomicU64::new(0),
            cancel_token: CancellationToken::new(),
            refresh_task: Mutex::new(None),
        }
    }

    /// Fetch the key set once, then refresh it in the background.
    ///
    /// Never fails: if the initial fetch fails the store starts empty and the
    /// background task keeps trying on every interval.
    pub async fn start(jwks_url: String, options: JwksStoreOptions) -> Arc<Self> {
        let store = Arc::new(Self::new(jwks_url, options));

        if let Err(e) = store.refresh().await {
            tracing::error!(
                target: "ctl.auth.jwks",
                error = %e,
                "Initial JWKS fetch failed, starting with an empty key set"
            );
        }

        let handle = tokio::spawn(run_refresh_loop(
            Arc::downgrade(&store),
            store.options.refresh_interval,
            store.cancel_token.clone(),
        ));

        if let Ok(mut task) = store.refresh_task.lock() {
            *task = Some(handle);
        }

        tracing::info!(
            target: "ctl.auth.jwks",
            url = %store.jwks_url,
            refresh_interval_seconds = store.options.refresh_interval.as_secs(),
            "JWKS refresh task started"
        );

        store
    }

    /// Look up a verification key by ID in the current set.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::KeyNotFound` if the ID is not in the current set,
    /// including while the store is empty.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<VerificationKey, AuthError> {
        let snapshot = self.snapshot().await;

        match snapshot.keys.get(kid) {
            Some(key) => Ok(key.clone()),
            None => {
                tracing::debug!(
                    target: "ctl.auth.jwks",
                    kid = %kid,
                    key_count = snapshot.keys.len(),
                    "Key not found in JWKS"
                );
                Err(AuthError::KeyNotFound(kid.to_string()))
            }
        }
    }

    /// Fetch the JWKS document and replace the key set.
    ///
    /// On failure the current set is left untouched.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize, JwksError> {
        let result = self.fetch_document().await;
        let result = match result {
            Ok(body) => self.load_document(&body).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(key_count) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                metrics::record_jwks_refresh("success", Some(*key_count));
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_jwks_refresh("error", None);
                tracing::error!(
                    target: "ctl.auth.jwks",
                    error = %e,
                    consecutive_failures = failures,
                    "JWKS refresh failed, keeping last-known-good key set"
                );

                let health = self.health().await;
                if health.status == KeySetStatus::Degraded {
                    tracing::warn!(
                        target: "ctl.auth.jwks",
                        last_success_age_seconds = health.last_success_age_seconds,
                        key_count = health.key_count,
                        "JWKS key set is stale"
                    );
                }
            }
        }

        result
    }

    /// Parse a JWKS document and swap it in as the current key set.
    ///
    /// Unusable keys are skipped. A document that lists keys but none usable
    /// is rejected and leaves the current set in place. A document that lists
    /// no keys at all replaces the set with an empty one, so every token is
    /// denied until the provider publishes keys again.
    pub async fn load_document(&self, body: &str) -> Result<usize, JwksError> {
        let jwks: JwksResponse =
            serde_json::from_str(body).map_err(|e| JwksError::Parse(e.to_string()))?;

        let mut keys = HashMap::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            match VerificationKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(key.kid.clone(), key);
                }
                Err(reason) => {
                    tracing::warn!(
                        target: "ctl.auth.jwks",
                        kid = ?jwk.kid,
                        kty = %jwk.kty,
                        reason = %reason,
                        "Skipping unusable JWK"
                    );
                }
            }
        }

        if keys.is_empty() && !jwks.keys.is_empty() {
            return Err(JwksError::NoUsableKeys);
        }

        let key_count = keys.len();
        let snapshot = Arc::new(KeySnapshot {
            keys,
            fetched_at: Some(Instant::now()),
        });

        *self.current.write().await = snapshot;

        if key_count == 0 {
            tracing::warn!(target: "ctl.auth.jwks", "JWKS document lists no keys, all tokens will be rejected");
        } else {
            tracing::info!(target: "ctl.auth.jwks", key_count, "JWKS key set refreshed");
        }

        Ok(key_count)
    }

    async fn fetch_document(&self) -> Result<String, JwksError> {
        tracing::debug!(target: "ctl.auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(JwksError::Status(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))
    }

    /// Current health of the key set.
    pub async fn health(&self) -> JwksHealth {
        let snapshot = self.snapshot().await;
        let age = snapshot.fetched_at.map(|t| t.elapsed());

        let status = match age {
            Some(_) if snapshot.keys.is_empty() => KeySetStatus::Empty,
            Some(age) if age > self.stale_after() => KeySetStatus::Degraded,
            Some(_) => KeySetStatus::Healthy,
            None => KeySetStatus::Empty,
        };

        if let Some(age) = age {
            metrics::set_jwks_last_success_age(age);
        }

        JwksHealth {
            status,
            key_count: snapshot.keys.len(),
            last_success_age_seconds: age.map(|a| a.as_secs()),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    /// Stop the background refresh task and wait for it to exit.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();

        let handle = self.refresh_task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(target: "ctl.auth.jwks", error = %e, "JWKS refresh task ended abnormally");
            }
        }

        tracing::info!(target: "ctl.auth.jwks", "JWKS refresh task stopped");
    }

    /// Whether the background task has been told to stop.
    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn snapshot(&self) -> Arc<KeySnapshot> {
        self.current.read().await.clone()
    }

    fn stale_after(&self) -> Duration {
        self.options
            .refresh_interval
            .saturating_mul(self.options.max_stale_intervals)
    }
}

impl Drop for JwksStore {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Refresh the store every `interval` until cancelled or the store is dropped.
async fn run_refresh_loop(
    store: Weak<JwksStore>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else {
                    break;
                };
                tokio::select! {
                    // Errors are logged and counted inside refresh()
                    _ = store.refresh() => {}
                    _ = cancel_token.cancelled() => break,
                }
            }
            _ = cancel_token.cancelled() => {
                tracing::info!(target: "ctl.auth.jwks", "JWKS refresh task received shutdown signal, exiting");
                break;
            }
        }
    }
}
