//! Unencrypted OpenSSH private key files.

use super::{AssertionKey, Probe, SigningAlgorithm};
use crate::errors::ClientError;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey};
use rsa::pkcs1::EncodeRsaPrivateKey;
use ssh_key::private::RsaKeypair;
use ssh_key::{HashAlg, Mpint, PrivateKey};
use std::path::Path;

/// A private key read from disk, converted for `jsonwebtoken`.
pub struct FileKey {
    algorithm: SigningAlgorithm,
    key_id: String,
    encoding_key: EncodingKey,
}

impl FileKey {
    /// Parse an OpenSSH private key file.
    ///
    /// Missing, unreadable and passphrase-protected files are skipped; there
    /// is no passphrase prompt.
    pub(crate) fn load(path: &Path) -> Probe {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!(target: "client.signer", path = %path.display(), error = %e, "Key file not readable");
                return Probe::Missing;
            }
        };

        let private_key = match PrivateKey::from_openssh(contents.as_bytes()) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(target: "client.signer", path = %path.display(), error = %e, "Skipping unparseable key file");
                return Probe::Missing;
            }
        };

        if private_key.is_encrypted() {
            tracing::warn!(target: "client.signer", path = %path.display(), "Skipping passphrase-protected key file");
            return Probe::Missing;
        }

        match Self::from_private_key(&private_key) {
            Ok(Some(key)) => {
                tracing::debug!(target: "client.signer", path = %path.display(), key_id = %key.key_id, "Loaded key file");
                Probe::Found(Box::new(key))
            }
            Ok(None) => Probe::Unsupported(private_key.algorithm().as_str().to_string()),
            Err(e) => {
                tracing::warn!(target: "client.signer", path = %path.display(), reason = %e, "Key file cannot sign");
                Probe::Unusable(e)
            }
        }
    }

    /// Convert a decrypted key. `Ok(None)` means the key type cannot sign
    /// assertions; `Err` means the key is of a supported type but malformed.
    fn from_private_key(private_key: &PrivateKey) -> Result<Option<Self>, String> {
        let key_id = private_key
            .public_key()
            .fingerprint(HashAlg::Sha256)
            .to_string();

        let (algorithm, encoding_key) = match private_key.key_data() {
            ssh_key::private::KeypairData::Ed25519(keypair) => {
                let seed = keypair.private.to_bytes();
                let pkcs8 = pkcs8_from_ed25519_seed(&seed);
                (SigningAlgorithm::EdDSA, EncodingKey::from_ed_der(&pkcs8))
            }
            ssh_key::private::KeypairData::Rsa(keypair) => {
                let der = rsa_private_key(keypair)?
                    .to_pkcs1_der()
                    .map_err(|e| format!("invalid RSA key: {e}"))?;
                (
                    SigningAlgorithm::RS256,
                    EncodingKey::from_rsa_der(der.as_bytes()),
                )
            }
            _ => return Ok(None),
        };

        Ok(Some(Self {
            algorithm,
            key_id,
            encoding_key,
        }))
    }
}

#[async_trait]
impl AssertionKey for FileKey {
    fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn sign(&self, signing_input: &str) -> Result<String, ClientError> {
        let algorithm = match self.algorithm {
            SigningAlgorithm::EdDSA => Algorithm::EdDSA,
            SigningAlgorithm::RS256 => Algorithm::RS256,
        };
        jsonwebtoken::crypto::sign(signing_input.as_bytes(), &self.encoding_key, algorithm)
            .map_err(|e| ClientError::SigningFailed(e.to_string()))
    }
}

/// Rebuild an RSA key from the OpenSSH components and check them for consistency.
fn rsa_private_key(keypair: &RsaKeypair) -> Result<rsa::RsaPrivateKey, String> {
    let uint = |mpint: &Mpint| {
        mpint
            .as_positive_bytes()
            .map(rsa::BigUint::from_bytes_be)
            .ok_or_else(|| "invalid RSA key: negative component".to_string())
    };

    rsa::RsaPrivateKey::from_components(
        uint(&keypair.public.n)?,
        uint(&keypair.public.e)?,
        uint(&keypair.private.d)?,
        vec![uint(&keypair.private.p)?, uint(&keypair.private.q)?],
    )
    .map_err(|e| format!("invalid RSA key: {e}"))
}

/// Wrap a raw Ed25519 seed in the PKCS#8 v1 envelope `jsonwebtoken` expects.
fn pkcs8_from_ed25519_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);
    pkcs8.extend_from_slice(&[0x30, 0x2e, 0x02, 0x01, 0x00]);
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);
    pkcs8
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use ctl_test_utils::{
        build_pkcs8_from_seed, inconsistent_rsa_private_key, write_key_file, SSH_ECDSA_PRIVATE_KEY,
        SSH_ED25519_ENCRYPTED_PRIVATE_KEY, SSH_ED25519_FINGERPRINT, SSH_ED25519_PRIVATE_KEY,
        SSH_RSA_FINGERPRINT, SSH_RSA_PRIVATE_KEY,
    };

    fn found(probe: Probe) -> Box<dyn AssertionKey> {
        match probe {
            Probe::Found(key) => key,
            Probe::Unsupported(kind) => panic!("unexpected unsupported key: {kind}"),
            Probe::Unusable(reason) => panic!("unexpected unusable key: {reason}"),
            Probe::Missing => panic!("expected a key"),
        }
    }

    #[test]
    fn test_pkcs8_envelope_matches_fixture_builder() {
        let seed = [7u8; 32];
        assert_eq!(pkcs8_from_ed25519_seed(&seed), build_pkcs8_from_seed(&seed));
    }

    #[test]
    fn test_load_ed25519_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key_file(dir.path(), "id_ed25519", SSH_ED25519_PRIVATE_KEY);

        let key = found(FileKey::load(&path));

        assert_eq!(key.algorithm(), SigningAlgorithm::EdDSA);
        assert_eq!(key.key_id(), SSH_ED25519_FINGERPRINT);
    }

    #[test]
    fn test_load_rsa_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key_file(dir.path(), "id_rsa", SSH_RSA_PRIVATE_KEY);

        let key = found(FileKey::load(&path));

        assert_eq!(key.algorithm(), SigningAlgorithm::RS256);
        assert_eq!(key.key_id(), SSH_RSA_FINGERPRINT);
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileKey::load(&dir.path().join("id_ed25519")),
            Probe::Missing
        ));
    }

    #[test]
    fn test_encrypted_and_garbage_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let encrypted = write_key_file(dir.path(), "id_enc", SSH_ED25519_ENCRYPTED_PRIVATE_KEY);
        let garbage = write_key_file(dir.path(), "id_garbage", "not a key\n");

        assert!(matches!(FileKey::load(&encrypted), Probe::Missing));
        assert!(matches!(FileKey::load(&garbage), Probe::Missing));
    }

    #[test]
    fn test_ecdsa_key_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key_file(dir.path(), "id_ecdsa", SSH_ECDSA_PRIVATE_KEY);

        match FileKey::load(&path) {
            Probe::Unsupported(kind) => assert!(kind.starts_with("ecdsa")),
            _ => panic!("expected an unsupported key"),
        }
    }

    #[test]
    fn test_inconsistent_rsa_key_is_unusable_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key_file(dir.path(), "id_rsa", &inconsistent_rsa_private_key());

        match FileKey::load(&path) {
            Probe::Unusable(reason) => assert!(reason.contains("invalid RSA key"), "{reason}"),
            Probe::Found(_) => panic!("expected an unusable key, got a usable one"),
            Probe::Unsupported(kind) => panic!("expected an unusable key, got unsupported {kind}"),
            Probe::Missing => panic!("expected an unusable key, got nothing"),
        }
    }

    #[tokio::test]
    async fn test_rsa_signature_verifies_with_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key_file(dir.path(), "id_rsa", SSH_RSA_PRIVATE_KEY);
        let key = found(FileKey::load(&path));

        let signature = key.sign("header.payload").await.unwrap();

        let public = PrivateKey::from_openssh(SSH_RSA_PRIVATE_KEY).unwrap();
        let rsa_public = public.public_key().key_data().rsa().unwrap();
        let decoding_key = jsonwebtoken::DecodingKey::from_rsa_raw_components(
            rsa_public.n.as_positive_bytes().unwrap(),
            rsa_public.e.as_positive_bytes().unwrap(),
        );
        assert!(jsonwebtoken::crypto::verify(
            &signature,
            b"header.payload",
            &decoding_key,
            Algorithm::RS256
        )
        .unwrap());
    }

    #[tokio::test]
    async fn test_ed25519_signature_is_base64url() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key_file(dir.path(), "id_ed25519", SSH_ED25519_PRIVATE_KEY);
        let key = found(FileKey::load(&path));

        let signature = key.sign("header.payload").await.unwrap();

        // 64-byte Ed25519 signature, unpadded base64url
        assert_eq!(signature.len(), 86);
        assert!(!signature.contains(['+', '/', '=']));
    }
}
