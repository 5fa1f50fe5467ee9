//! Mock identity provider
//!
//! A `wiremock` server standing in for Dex: it serves the key-discovery
//! document at `/.well-known/jwks.json` and the OAuth2 token endpoint at
//! `/token`. The server's base URI doubles as the issuer URL.

use crate::crypto_fixtures::jwks_document;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the key-discovery document relative to the issuer.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Path of the token endpoint relative to the issuer.
pub const TOKEN_PATH: &str = "/token";

/// Mock Dex instance for tests.
///
/// # Example
/// ```rust,ignore
/// let idp = MockIdentityProvider::start().await;
/// idp.mount_jwks(&[TestKeypair::new(1, "k1").jwk_json()]).await;
/// idp.mount_token_response(serde_json::json!({"id_token": "eyJ..."})).await;
/// ```
pub struct MockIdentityProvider {
    server: MockServer,
}

impl MockIdentityProvider {
    /// Start a mock on a random local port with no endpoints mounted.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Issuer URL (the server's base URI, no trailing slash).
    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    /// Full URL of the key-discovery document.
    pub fn jwks_url(&self) -> String {
        format!("{}{JWKS_PATH}", self.server.uri())
    }

    /// Direct access to the underlying server for custom mocks.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Serve `keys` from the key-discovery endpoint.
    pub async fn mount_jwks(&self, keys: &[Value]) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .mount(&self.server)
            .await;
    }

    /// Replace everything mounted so far with a JWKS serving `keys`.
    ///
    /// Resets all mocks, including any token endpoint, and the request log.
    pub async fn rotate_jwks(&self, keys: &[Value]) {
        self.server.reset().await;
        self.mount_jwks(keys).await;
    }

    /// Make the key-discovery endpoint fail with `status`, dropping all other mocks.
    pub async fn fail_jwks(&self, status: u16) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serve a raw body from the key-discovery endpoint, dropping all other mocks.
    pub async fn serve_raw_jwks(&self, body: &str) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Answer token-exchange requests with HTTP 200 and `body`.
    pub async fn mount_token_response(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answer token-exchange requests with `status` and a raw `body`.
    pub async fn mount_token_rejection(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Form bodies of every request received at the token endpoint.
    pub async fn token_request_bodies(&self) -> Vec<String> {
        self.requests_to(TOKEN_PATH)
            .await
            .into_iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }

    /// Number of key-discovery fetches since the last reset.
    pub async fn jwks_request_count(&self) -> usize {
        self.requests_to(JWKS_PATH).await.len()
    }

    async fn requests_to(&self, request_path: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto_fixtures::{TestKeypair, TestSigningKey};

    #[tokio::test]
    async fn test_serves_jwks_and_counts_fetches() {
        let idp = MockIdentityProvider::start().await;
        idp.mount_jwks(&[TestKeypair::new(1, "k1").jwk_json()]).await;

        let body: Value = reqwest::get(idp.jwks_url()).await.unwrap().json().await.unwrap();

        assert_eq!(body["keys"][0]["kid"], "k1");
        assert_eq!(idp.jwks_request_count().await, 1);
    }

    #[tokio::test]
    async fn test_rotate_replaces_keys() {
        let idp = MockIdentityProvider::start().await;
        idp.mount_jwks(&[TestKeypair::new(1, "k1").jwk_json()]).await;
        idp.rotate_jwks(&[TestKeypair::new(2, "k2").jwk_json()]).await;

        let body: Value = reqwest::get(idp.jwks_url()).await.unwrap().json().await.unwrap();

        assert_eq!(body["keys"].as_array().unwrap().len(), 1);
        assert_eq!(body["keys"][0]["kid"], "k2");
    }

    #[tokio::test]
    async fn test_token_rejection_and_request_log() {
        let idp = MockIdentityProvider::start().await;
        idp.mount_token_rejection(400, r#"{"error":"invalid_grant"}"#).await;

        let response = reqwest::Client::new()
            .post(format!("{}{TOKEN_PATH}", idp.issuer()))
            .body("grant_type=x")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
        assert_eq!(idp.token_request_bodies().await, vec!["grant_type=x".to_string()]);
    }
}
