//! Full client flow: resolve settings, sign with a key file, exchange.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::secret::ExposeSecret;
use ctl_client::config::ClusterFile;
use ctl_client::{authenticate, ClientError, ClientOverrides, ClientSettings};
use ctl_test_utils::{
    write_key_file, MockIdentityProvider, TokenAssertions, SSH_ED25519_FINGERPRINT,
    SSH_ED25519_PRIVATE_KEY, SSH_RSA_FINGERPRINT, SSH_RSA_PRIVATE_KEY,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;

fn settings(idp: &MockIdentityProvider, key_path: &Path, cluster: Option<&str>) -> ClientSettings {
    let vars: HashMap<String, String> = [
        ("DEX_URL", idp.issuer()),
        ("USER", "alice".to_string()),
        ("K8SCTL_SSH_KEYS", key_path.display().to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let file: ClusterFile = serde_yaml::from_str(
        r#"
default_environment: dev
clusters:
  prod-east:
    environment: prod
"#,
    )
    .unwrap();

    let overrides = ClientOverrides {
        cluster: cluster.map(str::to_string),
        ..ClientOverrides::default()
    };
    ClientSettings::resolve(overrides, &vars, &file).unwrap()
}

/// The `subject_token` field of a form-encoded body.
fn subject_token(body: &str) -> String {
    body.split('&')
        .find_map(|pair| pair.strip_prefix("subject_token="))
        .expect("subject_token in form body")
        .to_string()
}

#[tokio::test]
async fn test_authenticate_signs_and_exchanges() {
    let idp = MockIdentityProvider::start().await;
    idp.mount_token_response(json!({ "id_token": "service-id-token" }))
        .await;
    let dir = tempfile::tempdir().unwrap();
    let key = write_key_file(dir.path(), "id_ed25519", SSH_ED25519_PRIVATE_KEY);

    let token = authenticate(&settings(&idp, &key, Some("prod-east")))
        .await
        .unwrap();

    assert_eq!(token.expose_secret(), "service-id-token");

    let bodies = idp.token_request_bodies().await;
    let body = bodies.first().unwrap();
    // Assertion is addressed to the identity provider; the exchange asks for
    // the target service's audience.
    subject_token(body)
        .assert_valid_jwt("EdDSA")
        .assert_signed_by(SSH_ED25519_FINGERPRINT)
        .assert_for_subject("alice")
        .assert_audience(&idp.issuer());
    assert!(body.contains("audience=https%3A%2F%2Fk8sctl-prod.example.com"));
}

#[tokio::test]
async fn test_authenticate_with_rsa_key() {
    let idp = MockIdentityProvider::start().await;
    idp.mount_token_response(json!({ "access_token": "access-only" }))
        .await;
    let dir = tempfile::tempdir().unwrap();
    let key = write_key_file(dir.path(), "id_rsa", SSH_RSA_PRIVATE_KEY);

    let token = authenticate(&settings(&idp, &key, None)).await.unwrap();

    assert_eq!(token.expose_secret(), "access-only");
    let bodies = idp.token_request_bodies().await;
    let body = bodies.first().unwrap();
    subject_token(body)
        .assert_valid_jwt("RS256")
        .assert_signed_by(SSH_RSA_FINGERPRINT);
    assert!(body.contains("audience=https%3A%2F%2Fk8sctl-dev.example.com"));
}

#[tokio::test]
async fn test_no_key_fails_before_contacting_provider() {
    let idp = MockIdentityProvider::start().await;
    idp.mount_token_response(json!({ "id_token": "unused" })).await;
    let dir = tempfile::tempdir().unwrap();

    let err = authenticate(&settings(&idp, &dir.path().join("id_missing"), None))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::SigningUnavailable));
    assert!(idp.token_request_bodies().await.is_empty());
}

#[tokio::test]
async fn test_rejected_exchange_surfaces_provider_error() {
    let idp = MockIdentityProvider::start().await;
    idp.mount_token_rejection(400, r#"{"error":"invalid_grant"}"#)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let key = write_key_file(dir.path(), "id_ed25519", SSH_ED25519_PRIVATE_KEY);

    let err = authenticate(&settings(&idp, &key, None)).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        r#"token exchange rejected (400): {"error":"invalid_grant"}"#
    );
}
