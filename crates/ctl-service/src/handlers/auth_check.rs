//! Authentication check handler.
//!
//! `POST /v1/auth-check` lets a client confirm its token is accepted before
//! issuing real requests. It does nothing beyond reporting who the caller is.

use crate::auth::AuthenticatedUser;
use crate::errors::CtlError;
use axum::{Extension, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct AuthCheckResponse {
    pub status: &'static str,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Handler for POST /v1/auth-check
///
/// # Errors
///
/// Returns `CtlError::Internal` if mounted without the auth middleware.
#[tracing::instrument(skip_all, name = "ctl.auth_check")]
pub async fn auth_check(
    user: Option<Extension<AuthenticatedUser>>,
) -> Result<Json<AuthCheckResponse>, CtlError> {
    let Some(Extension(user)) = user else {
        return Err(CtlError::Internal(
            "auth-check reached without an authenticated user".to_string(),
        ));
    };

    tracing::info!(target: "ctl.auth_check", email = ?user.email, "Authentication check succeeded");

    Ok(Json(AuthCheckResponse {
        status: "authenticated",
        subject: user.subject,
        email: user.email,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auth_check_reports_identity() {
        let user = AuthenticatedUser {
            subject: "CgVhbGljZRIDc3No".to_string(),
            email: Some("alice@example.com".to_string()),
        };

        let Json(body) = auth_check(Some(Extension(user))).await.unwrap();

        assert_eq!(body.status, "authenticated");
        assert_eq!(body.subject, "CgVhbGljZRIDc3No");
        assert_eq!(body.email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_auth_check_without_middleware_is_internal_error() {
        let err = auth_check(None).await.unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_email_omitted_when_absent() {
        let body = AuthCheckResponse {
            status: "authenticated",
            subject: "bob".to_string(),
            email: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("email"));
    }
}
