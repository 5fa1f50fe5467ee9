//! End-to-end client authentication and authenticated requests.

use crate::config::ClientSettings;
use crate::errors::ClientError;
use crate::exchange::{ExchangeRequest, TokenExchanger};
use crate::signer::AssertionSigner;
use common::secret::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument};

/// Sign an assertion with the caller's SSH key and exchange it for a bearer
/// token scoped to the target service.
///
/// # Errors
///
/// Any signing or exchange failure, unchanged.
#[instrument(skip_all)]
pub async fn authenticate(settings: &ClientSettings) -> Result<SecretString, ClientError> {
    let assertion = AssertionSigner::from_settings(settings)
        .sign(&settings.username, &settings.dex_url)
        .await?;

    debug!(
        target: "client.exchange",
        key_id = %assertion.key_id,
        username = %settings.username,
        audience = %settings.target_audience,
        "Signed assertion, exchanging"
    );

    let exchanger = TokenExchanger::new(&settings.dex_url)?;
    let result = exchanger
        .exchange(ExchangeRequest {
            assertion: &assertion.token,
            client_id: &settings.client_id,
            client_secret: settings.client_secret.as_ref(),
            audience: Some(&settings.target_audience),
        })
        .await?;

    result.into_bearer_token()
}

/// HTTP client that attaches a bearer token to every request.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    http_client: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl AuthenticatedClient {
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(base_url: &str, token: SecretString, timeout: Duration) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Client for the resolved service URL and request timeout.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn from_settings(settings: &ClientSettings, token: SecretString) -> Result<Self, ClientError> {
        Self::new(&settings.server_url, token, settings.request_timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send `body` (JSON text, if any) to `path` with the bearer token attached.
    ///
    /// The response is returned whatever its status; only transport
    /// failures are errors.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Request` on transport failure or timeout.
    #[instrument(skip_all, fields(method = %method, path = %path))]
    pub async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<String>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .http_client
            .request(method, self.url(path))
            .bearer_auth(self.token.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.body(body);
        }

        request
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = AuthenticatedClient::new(
            "https://k8sctl-dev.example.com/",
            SecretString::from("t"),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            client.url("/v1/auth-check"),
            "https://k8sctl-dev.example.com/v1/auth-check"
        );
        assert_eq!(
            client.url("v1/clusters"),
            "https://k8sctl-dev.example.com/v1/clusters"
        );
    }

    #[tokio::test]
    async fn test_send_attaches_bearer_and_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/clusters"))
            .and(header("authorization", "Bearer id-token"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"name":"prod"}"#))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthenticatedClient::new(
            &server.uri(),
            SecretString::from("id-token"),
            Duration::from_secs(5),
        )
        .unwrap();

        let response = client
            .send(
                reqwest::Method::POST,
                "/v1/clusters",
                Some(r#"{"name":"prod"}"#.to_string()),
            )
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 201);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_error() {
        let client = AuthenticatedClient::new(
            "http://127.0.0.1:1",
            SecretString::from("t"),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = client
            .send(reqwest::Method::GET, "/status", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Request(_)));
    }
}
