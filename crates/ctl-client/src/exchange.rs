//! OAuth 2.0 token exchange against the identity provider.
//!
//! Trades a signed SSH assertion for an identity token whose audience is the
//! target service (not the identity provider the assertion was addressed to).
//! A single attempt per call; callers decide whether to run the whole flow
//! again.

use crate::errors::ClientError;
use common::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

pub const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
pub const ID_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";
pub const EXCHANGE_SCOPE: &str = "openid email groups profile";
pub const SSH_CONNECTOR_ID: &str = "ssh";

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Inputs for one exchange.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeRequest<'a> {
    pub assertion: &'a SecretString,
    pub client_id: &'a str,
    pub client_secret: Option<&'a SecretString>,
    /// Audience of the service the token is meant for.
    pub audience: Option<&'a str>,
}

/// Tokens returned by the identity provider.
#[derive(Debug, Clone)]
pub struct ExchangeResult {
    pub id_token: Option<SecretString>,
    pub access_token: Option<SecretString>,
}

impl ExchangeResult {
    /// The identity token if present, else the access token.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NoTokenReceived` if both are absent or empty.
    pub fn into_bearer_token(self) -> Result<SecretString, ClientError> {
        self.id_token
            .or(self.access_token)
            .ok_or(ClientError::NoTokenReceived)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

fn non_empty_secret(value: Option<String>) -> Option<SecretString> {
    value.filter(|v| !v.is_empty()).map(SecretString::from)
}

/// Client for the identity provider's token endpoint.
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    http_client: reqwest::Client,
    token_url: String,
}

impl TokenExchanger {
    /// Build an exchanger for the identity provider at `issuer`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(issuer: &str) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            token_url: format!("{}/token", issuer.trim_end_matches('/')),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Exchange `request.assertion` for tokens scoped to `request.audience`.
    ///
    /// # Errors
    ///
    /// - `ClientError::ExchangeRequestFailed` on transport failure or timeout
    /// - `ClientError::ExchangeRejected` on a non-success status, carrying the body
    /// - `ClientError::ExchangeResponseUnparseable` if the body is not a token response
    #[instrument(skip_all)]
    pub async fn exchange(&self, request: ExchangeRequest<'_>) -> Result<ExchangeResult, ClientError> {
        debug!(
            target: "client.exchange",
            url = %self.token_url,
            client_id = %request.client_id,
            audience = request.audience.unwrap_or("<none>"),
            "Requesting token exchange"
        );

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", TOKEN_EXCHANGE_GRANT),
            ("subject_token_type", ACCESS_TOKEN_TYPE),
            ("subject_token", request.assertion.expose_secret()),
            ("requested_token_type", ID_TOKEN_TYPE),
            ("scope", EXCHANGE_SCOPE),
            ("connector_id", SSH_CONNECTOR_ID),
            ("client_id", request.client_id),
        ];
        if let Some(secret) = request.client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }
        if let Some(audience) = request.audience {
            form.push(("audience", audience));
        }

        let response = self
            .http_client
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "client.exchange", error = %e, "HTTP request failed");
                ClientError::ExchangeRequestFailed(e.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            debug!(target: "client.exchange", error = %e, "Failed to read response body");
            ClientError::ExchangeRequestFailed(e.to_string())
        })?;

        if !status.is_success() {
            warn!(
                target: "client.exchange",
                status = %status,
                "Token exchange rejected by identity provider"
            );
            trace!(target: "client.exchange", body = %body, "Token exchange rejection body");
            return Err(ClientError::ExchangeRejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(target: "client.exchange", error = %e, "Failed to parse token response");
            ClientError::ExchangeResponseUnparseable(e.to_string())
        })?;

        let result = ExchangeResult {
            id_token: non_empty_secret(parsed.id_token),
            access_token: non_empty_secret(parsed.access_token),
        };

        debug!(
            target: "client.exchange",
            has_id_token = result.id_token.is_some(),
            has_access_token = result.access_token.is_some(),
            "Token exchange completed"
        );

        Ok(result)
    }
}
