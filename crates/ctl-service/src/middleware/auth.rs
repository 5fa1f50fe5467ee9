//! Authentication middleware for protected routes.
//!
//! Extracts the bearer token from the `Authorization` header, validates it
//! with the [`TokenValidator`], and injects [`ValidatedClaims`] and
//! [`AuthenticatedUser`] into request extensions. Requests that fail never
//! reach the handler.

use crate::auth::{AuthenticatedUser, TokenValidator, ValidatedClaims};
use crate::errors::{AuthError, CtlError};
use crate::observability::metrics::record_token_validation;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub validator: Arc<TokenValidator>,
}

/// Extract the bearer token from the `Authorization` header.
///
/// The scheme is matched case-insensitively. A header that is not visible
/// ASCII, uses another scheme, or carries an empty token is malformed.
fn extract_bearer_token(req: &Request) -> Result<&str, AuthError> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?;

    let value = header
        .to_str()
        .map_err(|_| AuthError::MalformedAuthHeader)?;

    let mut parts = value.splitn(2, ' ');
    let (Some(scheme), Some(token)) = (parts.next(), parts.next()) else {
        return Err(AuthError::MalformedAuthHeader);
    };

    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MalformedAuthHeader);
    }

    Ok(token)
}

/// Authentication middleware.
///
/// # Response
///
/// - 401 Unauthorized with `{"error": "<reason>"}` if the token is missing or invalid
/// - Otherwise continues with `ValidatedClaims` and `AuthenticatedUser` in extensions
#[instrument(skip_all, name = "ctl.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, CtlError> {
    let start = Instant::now();

    let extracted = extract_bearer_token(&req);
    let result = match extracted {
        Ok(token) => state.validator.validate(token).await,
        Err(e) => Err(e),
    };

    let claims = match result {
        Ok(claims) => {
            record_token_validation("success", start.elapsed());
            claims
        }
        Err(e) => {
            record_token_validation(e.kind(), start.elapsed());
            tracing::warn!(
                target: "ctl.middleware.auth",
                method = %req.method(),
                path = %req.uri().path(),
                kind = e.kind(),
                error = %e,
                "Authentication failed"
            );
            return Err(CtlError::Unauthorized(e));
        }
    };

    tracing::debug!(
        target: "ctl.middleware.auth",
        path = %req.uri().path(),
        "Request authenticated"
    );

    let user = claims.authenticated_user();
    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Read the authenticated identity from a request that passed `require_auth`.
pub trait ClaimsExt {
    /// Returns `None` if the auth middleware was not applied to this request.
    fn claims(&self) -> Option<&ValidatedClaims>;

    fn authenticated_user(&self) -> Option<&AuthenticatedUser>;
}

impl<B> ClaimsExt for axum::extract::Request<B> {
    fn claims(&self) -> Option<&ValidatedClaims> {
        self.extensions().get::<ValidatedClaims>()
    }

    fn authenticated_user(&self) -> Option<&AuthenticatedUser> {
        self.extensions().get::<AuthenticatedUser>()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::{JwksStore, JwksStoreOptions};
    use crate::config::AuthConfig;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use ctl_test_utils::{jwks_document, TestKeypair, TestSigningKey, TestTokenBuilder};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const ISSUER: &str = "https://dex.example.com";
    const AUDIENCE: &str = "https://svc.example.com";

    fn request_with_header(value: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri("/protected");
        if let Some(value) = value {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_bearer_token() {
        let req = request_with_header(Some("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&req).unwrap(), "abc.def.ghi");

        let req = request_with_header(Some("bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&req).unwrap(), "abc.def.ghi");

        let req = request_with_header(None);
        assert_eq!(
            extract_bearer_token(&req).unwrap_err(),
            AuthError::MissingAuthHeader
        );

        for malformed in ["Basic dXNlcjpwYXNz", "Bearer", "Bearer ", "abc.def.ghi"] {
            let req = request_with_header(Some(malformed));
            assert_eq!(
                extract_bearer_token(&req).unwrap_err(),
                AuthError::MalformedAuthHeader,
                "{malformed} should be malformed"
            );
        }
    }

    async fn protected_app(key: &TestKeypair) -> Router {
        let store = JwksStore::new(String::new(), JwksStoreOptions::default());
        store
            .load_document(&jwks_document(&[key.jwk_json()]).to_string())
            .await
            .unwrap();
        let validator = TokenValidator::new(
            AuthConfig {
                issuer_url: ISSUER.to_string(),
                audience: AUDIENCE.to_string(),
                allowed_groups: vec!["engineering".to_string()],
                clock_skew_seconds: 0,
            },
            Arc::new(store),
        );
        let auth_state = Arc::new(AuthState {
            validator: Arc::new(validator),
        });

        Router::new()
            .route(
                "/protected",
                get(|req: Request| async move {
                    let subject = req.authenticated_user().map(|u| u.subject.clone());
                    let has_claims = req.claims().is_some();
                    format!("{}:{has_claims}", subject.unwrap_or_default())
                }),
            )
            .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler_with_identity() {
        let key = TestKeypair::new(3, "dex-ed");
        let app = protected_app(&key).await;
        let token = key.sign_token(&TestTokenBuilder::new(ISSUER, AUDIENCE).for_subject("alice").build());

        let response = app
            .oneshot(request_with_header(Some(&format!("Bearer {token}"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"alice:true");
    }

    #[tokio::test]
    async fn test_rejected_token_never_reaches_handler() {
        let key = TestKeypair::new(3, "dex-ed");
        let app = protected_app(&key).await;
        let token = key.sign_token(
            &TestTokenBuilder::new(ISSUER, AUDIENCE)
                .with_groups(&["finance"])
                .build(),
        );

        let response = app
            .oneshot(request_with_header(Some(&format!("Bearer {token}"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid token: user not in allowed groups"));
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let key = TestKeypair::new(3, "dex-ed");
        let app = protected_app(&key).await;

        let response = app.oneshot(request_with_header(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "missing authorization header");
    }
}
