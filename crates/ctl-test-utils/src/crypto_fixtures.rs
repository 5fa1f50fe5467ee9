//! Deterministic cryptographic fixtures for testing
//!
//! Provides identity-provider signing keys in every JWK family the key store
//! accepts:
//! - `TestKeypair`: Ed25519, derived from a one-byte seed
//! - `TestRsaKeypair`: a fixed RSA-2048 key (RS256)
//! - `TestEcKeypair`: a fixed P-256 key (ES256)
//!
//! All fixtures are deterministic, so a JWKS document built from them is
//! byte-for-byte stable across runs.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Serialize;

/// Fixed RSA-2048 private key (PKCS#1 PEM) used to sign RS256 identity tokens.
pub const RSA_SIGNING_KEY_PEM: &str = include_str!("../fixtures/rsa_jwt_signing.pem");

/// Modulus of [`RSA_SIGNING_KEY_PEM`], base64url.
pub const RSA_SIGNING_KEY_N: &str = "28u-ieiymXsECrbTh8lkUzjJcuzuq9cL_mY2QxPrYFQqZorQ38yD7dcf2oXNb4NpQE--1eBLG3RAT4o2foPtiqtna2G8iv0hh_HV5qXyGPkcBhgP2bEAjjWOipkjRy0ZrAB38G-m9DZVNGBxTdyNtuO_XFRAbVKoyfUlGLwZAqqKJf4b5IipPW2K3FaM_bV7PpAgHjHQOj4UVEzwITwlIt-2nZw0dJAzVFvsx0n0NkVLBcTLaB8MUAy3k88P5Cnr_abXFtlPWyhXcx9ctjBfG8LBAvUyEVLefvvysu-rZYCBkjSMHAfZO-FnaZAeGLmGHkxS2209ds8CAcxl3JJkhQ";

/// Public exponent of [`RSA_SIGNING_KEY_PEM`], base64url.
pub const RSA_SIGNING_KEY_E: &str = "AQAB";

/// Fixed P-256 private key (PKCS#8 PEM) used to sign ES256 identity tokens.
pub const EC_SIGNING_KEY_PEM: &str = include_str!("../fixtures/ec_p256_signing.pem");

/// Affine x coordinate of [`EC_SIGNING_KEY_PEM`], base64url.
pub const EC_SIGNING_KEY_X: &str = "m0stl0XDC4GGJzrFFetiHxftx4UyiqRhnxEz5DKroOE";

/// Affine y coordinate of [`EC_SIGNING_KEY_PEM`], base64url.
pub const EC_SIGNING_KEY_Y: &str = "GDnB7d5Dr85plCP9xQImFc0ZJU0QW1Na0XguY7y0A1c";

/// A key the mock identity provider can sign identity tokens with.
pub trait TestSigningKey {
    /// Key identifier placed in the JWT header and the JWK.
    fn kid(&self) -> &str;

    /// JWS algorithm this key signs with.
    fn algorithm(&self) -> Algorithm;

    /// Private key in the form `jsonwebtoken` signs with.
    fn encoding_key(&self) -> EncodingKey;

    /// Public half as a JWK, suitable for a JWKS document.
    fn jwk_json(&self) -> serde_json::Value;

    /// Sign `claims` with this key, setting `alg`, `typ` and `kid`.
    fn sign_token<T: Serialize>(&self, claims: &T) -> String {
        let mut header = Header::new(self.algorithm());
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid().to_string());

        encode(&header, claims, &self.encoding_key()).expect("Failed to sign test token")
    }

    /// Sign `claims` with this key but omit `kid` from the header.
    fn sign_token_without_kid<T: Serialize>(&self, claims: &T) -> String {
        let mut header = Header::new(self.algorithm());
        header.typ = Some("JWT".to_string());

        encode(&header, claims, &self.encoding_key()).expect("Failed to sign test token")
    }
}

/// Deterministic Ed25519 keypair.
pub struct TestKeypair {
    pub kid: String,
    pub public_key_bytes: Vec<u8>,
    pub private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// Derive a keypair from `seed`. The same seed always yields the same key.
    pub fn new(seed: u8, kid: &str) -> Self {
        let seed_bytes = seed_bytes(seed);

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .expect("Failed to create test keypair");

        Self {
            kid: kid.to_string(),
            public_key_bytes: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: build_pkcs8_from_seed(&seed_bytes),
        }
    }
}

impl TestSigningKey for TestKeypair {
    fn kid(&self) -> &str {
        &self.kid
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::EdDSA
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ed_der(&self.private_key_pkcs8)
    }

    fn jwk_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "alg": "EdDSA",
            "use": "sig"
        })
    }
}

/// The fixed RSA-2048 identity-provider key. Dex signs with RS256 by default.
pub struct TestRsaKeypair {
    pub kid: String,
}

impl TestRsaKeypair {
    pub fn new(kid: &str) -> Self {
        Self {
            kid: kid.to_string(),
        }
    }
}

impl TestSigningKey for TestRsaKeypair {
    fn kid(&self) -> &str {
        &self.kid
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::RS256
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_rsa_pem(RSA_SIGNING_KEY_PEM.as_bytes()).expect("Invalid RSA fixture")
    }

    fn jwk_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "RSA",
            "kid": self.kid,
            "n": RSA_SIGNING_KEY_N,
            "e": RSA_SIGNING_KEY_E,
            "alg": "RS256",
            "use": "sig"
        })
    }
}

/// The fixed P-256 identity-provider key.
pub struct TestEcKeypair {
    pub kid: String,
}

impl TestEcKeypair {
    pub fn new(kid: &str) -> Self {
        Self {
            kid: kid.to_string(),
        }
    }
}

impl TestSigningKey for TestEcKeypair {
    fn kid(&self) -> &str {
        &self.kid
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::ES256
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ec_pem(EC_SIGNING_KEY_PEM.as_bytes()).expect("Invalid EC fixture")
    }

    fn jwk_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "EC",
            "kid": self.kid,
            "crv": "P-256",
            "x": EC_SIGNING_KEY_X,
            "y": EC_SIGNING_KEY_Y,
            "alg": "ES256",
            "use": "sig"
        })
    }
}

/// Wrap JWKs into a `{"keys": [...]}` document.
pub fn jwks_document(keys: &[serde_json::Value]) -> serde_json::Value {
    serde_json::json!({ "keys": keys })
}

/// Sign `claims` with HMAC-SHA256 under a guessable secret.
///
/// Models the classic algorithm-confusion attack: an attacker who knows a
/// public key id tries to get a symmetric token accepted.
pub fn forge_hs256_token<T: Serialize>(kid: &str, claims: &T) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());

    encode(&header, claims, &EncodingKey::from_secret(b"public-key-as-secret"))
        .expect("Failed to sign HS256 token")
}

/// Build an `alg: none` token with an empty signature segment.
pub fn unsigned_token<T: Serialize>(kid: &str, claims: &T) -> String {
    let header = serde_json::json!({ "alg": "none", "typ": "JWT", "kid": kid });
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
    let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());

    format!("{header_b64}.{claims_b64}.")
}

/// Replace the signature segment of `token` with a signature over different bytes.
pub fn tamper_signature(token: &str) -> String {
    let (signing_input, signature) = token.rsplit_once('.').expect("JWT must have 3 parts");
    let mut bytes = URL_SAFE_NO_PAD.decode(signature).expect("signature base64");
    if let Some(first) = bytes.first_mut() {
        *first ^= 0xff;
    }
    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(bytes))
}

fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    seed_bytes
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// `jsonwebtoken` only takes Ed25519 private keys as PKCS#8 DER, and ring
/// does not serialise seeded keys, so the 48-byte document is built by hand:
/// SEQUENCE { INTEGER 0, SEQUENCE { OID 1.3.101.112 }, OCTET STRING { OCTET STRING seed } }
pub fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}
