//! Identity-token claims.
//!
//! Tokens are decoded into `RawClaims`, where every field is an untyped JSON
//! value. The validator checks each value's shape before using it and only
//! then builds `ValidatedClaims`. Subject and email are redacted in Debug
//! output to keep them out of logs.

use common::jwt::Audience;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Claims as decoded from the token payload, before any shape checks.
///
/// Unknown claims are ignored. `null` decodes to `None`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawClaims {
    #[serde(default)]
    pub iss: Option<Value>,
    #[serde(default)]
    pub aud: Option<Value>,
    #[serde(default)]
    pub exp: Option<Value>,
    #[serde(default)]
    pub sub: Option<Value>,
    #[serde(default)]
    pub email: Option<Value>,
    #[serde(default)]
    pub groups: Option<Value>,
}

impl RawClaims {
    /// `iss` when it is a string.
    pub fn issuer(&self) -> Option<&str> {
        self.iss.as_ref().and_then(Value::as_str)
    }

    /// `aud` as a string or a list of strings. Non-string list entries are dropped.
    pub fn audience(&self) -> Option<Audience> {
        match self.aud.as_ref()? {
            Value::String(aud) => Some(Audience::Single(aud.clone())),
            Value::Array(items) => Some(Audience::Many(string_items(items))),
            _ => None,
        }
    }

    /// `exp` as whole seconds, accepting integer and float encodings.
    pub fn expiration(&self) -> Option<i64> {
        let exp = self.exp.as_ref()?;
        exp.as_i64().or_else(|| {
            exp.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        })
    }

    /// `groups` when it is a list. Non-string entries are dropped.
    pub fn groups(&self) -> Option<Vec<String>> {
        match self.groups.as_ref()? {
            Value::Array(items) => Some(string_items(items)),
            _ => None,
        }
    }

    pub fn subject(&self) -> String {
        self.sub
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn email(&self) -> Option<String> {
        self.email
            .as_ref()
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }
}

fn string_items(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(Value::as_str)
        .map(ToString::to_string)
        .collect()
}

/// Claims of a token that passed every validation gate.
///
/// Only [`crate::auth::TokenValidator`] constructs this type.
#[derive(Clone)]
pub struct ValidatedClaims {
    pub issuer: String,
    pub audience: Audience,
    /// Expiration (Unix epoch seconds).
    pub expiration: i64,
    /// Subject; empty when the token carried none. Redacted in Debug output.
    pub subject: String,
    /// Redacted in Debug output.
    pub email: Option<String>,
    pub groups: Option<Vec<String>>,
}

impl fmt::Debug for ValidatedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedClaims")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiration", &self.expiration)
            .field("subject", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("groups", &self.groups)
            .finish()
    }
}

impl ValidatedClaims {
    /// The identity handlers attach to audit records.
    pub fn authenticated_user(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            subject: self.subject.clone(),
            email: self.email.clone(),
        }
    }
}

/// The verified caller, attached to every authenticated request.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub subject: String,
    pub email: Option<String>,
}

impl fmt::Debug for AuthenticatedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedUser")
            .field("subject", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawClaims {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_audience_accepts_string_and_list() {
        let single = raw(json!({"aud": "https://svc.example.com"}));
        let list = raw(json!({"aud": ["kubernetes", 42, "https://svc.example.com"]}));

        assert_eq!(
            single.audience(),
            Some(Audience::Single("https://svc.example.com".to_string()))
        );
        assert_eq!(
            list.audience().unwrap().values(),
            vec!["kubernetes", "https://svc.example.com"]
        );
    }

    #[test]
    fn test_audience_rejects_other_shapes() {
        assert!(raw(json!({"aud": 7})).audience().is_none());
        assert!(raw(json!({"aud": {"a": 1}})).audience().is_none());
        assert!(raw(json!({"aud": null})).audience().is_none());
        assert!(raw(json!({})).audience().is_none());
    }

    #[test]
    fn test_expiration_shapes() {
        assert_eq!(raw(json!({"exp": 1700000000})).expiration(), Some(1700000000));
        assert_eq!(raw(json!({"exp": 1700000000.9})).expiration(), Some(1700000000));
        assert_eq!(raw(json!({"exp": "1700000000"})).expiration(), None);
        assert_eq!(raw(json!({})).expiration(), None);
    }

    #[test]
    fn test_groups_shapes() {
        assert_eq!(
            raw(json!({"groups": ["engineering", 1, "sre"]})).groups(),
            Some(vec!["engineering".to_string(), "sre".to_string()])
        );
        assert_eq!(raw(json!({"groups": "engineering"})).groups(), None);
        assert_eq!(raw(json!({"groups": null})).groups(), None);
    }

    #[test]
    fn test_subject_and_email_defaults() {
        let claims = raw(json!({"sub": 12, "email": "alice@example.com"}));

        assert_eq!(claims.subject(), "");
        assert_eq!(claims.email().as_deref(), Some("alice@example.com"));
        assert_eq!(claims.issuer(), None);
    }

    #[test]
    fn test_validated_claims_debug_redacts_identity() {
        let claims = ValidatedClaims {
            issuer: "https://dex.example.com".to_string(),
            audience: Audience::Single("https://svc.example.com".to_string()),
            expiration: 1700000000,
            subject: "CgVhbGljZRIDc3No".to_string(),
            email: Some("alice@example.com".to_string()),
            groups: Some(vec!["engineering".to_string()]),
        };

        let debug_str = format!("{:?}", claims);
        assert!(!debug_str.contains("CgVhbGljZRIDc3No"));
        assert!(!debug_str.contains("alice@example.com"));
        assert!(debug_str.contains("engineering"));

        let user = claims.authenticated_user();
        assert_eq!(user.subject, "CgVhbGljZRIDc3No");
        assert!(!format!("{:?}", user).contains("alice@example.com"));
    }
}
