//! Signing through a running `ssh-agent`.
//!
//! Speaks the agent wire protocol directly over `SSH_AUTH_SOCK`: every
//! message is a big-endian `u32` length followed by a one-byte type and a
//! payload of SSH `string`s (themselves `u32`-length-prefixed).

use super::{encode_signature, AssertionKey, Probe, SigningAlgorithm};
use crate::errors::ClientError;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ssh_key::{public::KeyData, HashAlg, PublicKey};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const SSH_AGENT_FAILURE: u8 = 5;
const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
const SSH_AGENT_SIGN_RESPONSE: u8 = 14;

/// Ask the agent for an `rsa-sha2-256` signature instead of legacy SHA-1.
const SSH_AGENT_RSA_SHA2_256: u32 = 2;

const AGENT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_AGENT_MESSAGE_BYTES: usize = 256 * 1024;

/// An identity held by the agent. The private key never leaves the agent.
pub struct AgentKey {
    socket: PathBuf,
    key_blob: Bytes,
    algorithm: SigningAlgorithm,
    key_id: String,
}

impl AgentKey {
    /// Connect to the agent and pick its first Ed25519 or RSA identity.
    pub(crate) async fn connect(socket: &Path) -> Probe {
        let identities = match list_identities(socket).await {
            Ok(identities) => identities,
            Err(e) => {
                tracing::debug!(target: "client.agent", socket = %socket.display(), error = %e, "ssh-agent not usable");
                return Probe::Missing;
            }
        };

        let mut unsupported = Vec::new();
        for blob in identities {
            let public_key = match PublicKey::from_bytes(&blob) {
                Ok(key) => key,
                Err(e) => {
                    tracing::debug!(target: "client.agent", error = %e, "Skipping unparseable agent identity");
                    continue;
                }
            };

            let algorithm = match public_key.key_data() {
                KeyData::Ed25519(_) => SigningAlgorithm::EdDSA,
                KeyData::Rsa(_) => SigningAlgorithm::RS256,
                _ => {
                    unsupported.push(public_key.algorithm().as_str().to_string());
                    continue;
                }
            };

            let key_id = public_key.fingerprint(HashAlg::Sha256).to_string();
            tracing::debug!(target: "client.agent", key_id = %key_id, "Using ssh-agent identity");

            return Probe::Found(Box::new(Self {
                socket: socket.to_path_buf(),
                key_blob: blob,
                algorithm,
                key_id,
            }));
        }

        if unsupported.is_empty() {
            Probe::Missing
        } else {
            Probe::Unsupported(unsupported.join(", "))
        }
    }
}

#[async_trait]
impl AssertionKey for AgentKey {
    fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn sign(&self, signing_input: &str) -> Result<String, ClientError> {
        let flags = match self.algorithm {
            SigningAlgorithm::RS256 => SSH_AGENT_RSA_SHA2_256,
            SigningAlgorithm::EdDSA => 0,
        };

        let mut request = BytesMut::new();
        request.put_u8(SSH_AGENTC_SIGN_REQUEST);
        put_string(&mut request, &self.key_blob);
        put_string(&mut request, signing_input.as_bytes());
        request.put_u32(flags);

        let mut response = round_trip(&self.socket, &request).await?;
        match take_u8(&mut response)? {
            SSH_AGENT_SIGN_RESPONSE => {}
            SSH_AGENT_FAILURE => {
                return Err(ClientError::SigningFailed(
                    "ssh-agent refused to sign".to_string(),
                ))
            }
            other => {
                return Err(ClientError::SigningFailed(format!(
                    "unexpected ssh-agent response type {other}"
                )))
            }
        }

        // The signature blob is itself string(format) || string(raw signature)
        let mut blob = take_string(&mut response)?;
        let format = take_string(&mut blob)?;
        let signature = take_string(&mut blob)?;

        let expected = match self.algorithm {
            SigningAlgorithm::EdDSA => "ssh-ed25519".as_bytes(),
            SigningAlgorithm::RS256 => "rsa-sha2-256".as_bytes(),
        };
        if format.as_ref() != expected {
            return Err(ClientError::SigningFailed(format!(
                "ssh-agent returned a {} signature",
                String::from_utf8_lossy(&format)
            )));
        }

        Ok(encode_signature(&signature))
    }
}

/// Public key blobs of every identity the agent holds.
async fn list_identities(socket: &Path) -> Result<Vec<Bytes>, ClientError> {
    let mut response = round_trip(socket, &[SSH_AGENTC_REQUEST_IDENTITIES]).await?;

    let kind = take_u8(&mut response)?;
    if kind != SSH_AGENT_IDENTITIES_ANSWER {
        return Err(ClientError::SigningFailed(format!(
            "unexpected ssh-agent response type {kind}"
        )));
    }

    let count = take_u32(&mut response)?;
    let mut blobs = Vec::new();
    for _ in 0..count {
        let blob = take_string(&mut response)?;
        let _comment = take_string(&mut response)?;
        blobs.push(blob);
    }
    Ok(blobs)
}

/// Send one framed request on a fresh connection and read one framed reply.
async fn round_trip(socket: &Path, payload: &[u8]) -> Result<Bytes, ClientError> {
    let exchange = async {
        let mut stream = UnixStream::connect(socket).await?;

        let mut frame = BytesMut::with_capacity(payload.len() + 4);
        put_string(&mut frame, payload);
        stream.write_all(&frame).await?;

        let len = stream.read_u32().await? as usize;
        if len == 0 || len > MAX_AGENT_MESSAGE_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("agent message length {len} out of range"),
            ));
        }

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        Ok(Bytes::from(body))
    };

    match tokio::time::timeout(AGENT_TIMEOUT, exchange).await {
        Ok(Ok(body)) => Ok(body),
        Ok(Err(e)) => Err(ClientError::SigningFailed(format!("ssh-agent: {e}"))),
        Err(_) => Err(ClientError::SigningFailed(
            "ssh-agent did not answer in time".to_string(),
        )),
    }
}

fn put_string(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn truncated() -> ClientError {
    ClientError::SigningFailed("truncated ssh-agent message".to_string())
}

fn take_u8(buf: &mut Bytes) -> Result<u8, ClientError> {
    if buf.remaining() < 1 {
        return Err(truncated());
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut Bytes) -> Result<u32, ClientError> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_u32())
}

fn take_string(buf: &mut Bytes) -> Result<Bytes, ClientError> {
    let len = take_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    Ok(buf.split_to(len))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signer::AssertionSigner;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use common::secret::ExposeSecret;
    use ctl_test_utils::{
        TokenAssertions, SSH_ECDSA_PRIVATE_KEY, SSH_ED25519_FINGERPRINT, SSH_ED25519_PRIVATE_KEY,
    };
    use jsonwebtoken::{Algorithm, DecodingKey, Validation};
    use ring::signature::{Ed25519KeyPair, KeyPair};
    use ssh_key::PrivateKey;
    use tokio::net::UnixListener;

    const DEX: &str = "https://dex.example.com";

    /// How the fake agent answers sign requests.
    #[derive(Clone, Copy)]
    enum Behaviour {
        Sign,
        Refuse,
    }

    /// Minimal in-process agent holding the given private keys.
    struct FakeAgent {
        _dir: tempfile::TempDir,
        socket: PathBuf,
        task: tokio::task::JoinHandle<()>,
    }

    impl FakeAgent {
        fn start(keys: &[&str], behaviour: Behaviour) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let socket = dir.path().join("agent.sock");
            let listener = UnixListener::bind(&socket).unwrap();

            let keys: Vec<PrivateKey> = keys
                .iter()
                .map(|k| PrivateKey::from_openssh(k).unwrap())
                .collect();

            let task = tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    serve(stream, &keys, behaviour).await;
                }
            });

            Self {
                _dir: dir,
                socket,
                task,
            }
        }
    }

    impl Drop for FakeAgent {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    async fn serve(mut stream: UnixStream, keys: &[PrivateKey], behaviour: Behaviour) {
        let Ok(len) = stream.read_u32().await else {
            return;
        };
        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await.unwrap();
        let mut request = Bytes::from(body);

        let mut reply = BytesMut::new();
        match request.get_u8() {
            SSH_AGENTC_REQUEST_IDENTITIES => {
                reply.put_u8(SSH_AGENT_IDENTITIES_ANSWER);
                reply.put_u32(keys.len() as u32);
                for key in keys {
                    put_string(&mut reply, &key.public_key().to_bytes().unwrap());
                    put_string(&mut reply, b"alice@workstation");
                }
            }
            SSH_AGENTC_SIGN_REQUEST => {
                let blob = take_string(&mut request).unwrap();
                let data = take_string(&mut request).unwrap();
                let key = keys
                    .iter()
                    .find(|k| k.public_key().to_bytes().unwrap() == blob.as_ref())
                    .unwrap();

                match (behaviour, key.key_data()) {
                    (Behaviour::Sign, ssh_key::private::KeypairData::Ed25519(kp)) => {
                        let ring_key =
                            Ed25519KeyPair::from_seed_unchecked(&kp.private.to_bytes()).unwrap();
                        let mut sig_blob = BytesMut::new();
                        put_string(&mut sig_blob, b"ssh-ed25519");
                        put_string(&mut sig_blob, ring_key.sign(&data).as_ref());

                        reply.put_u8(SSH_AGENT_SIGN_RESPONSE);
                        put_string(&mut reply, &sig_blob);
                    }
                    _ => reply.put_u8(SSH_AGENT_FAILURE),
                }
            }
            _ => reply.put_u8(SSH_AGENT_FAILURE),
        }

        let mut frame = BytesMut::new();
        put_string(&mut frame, &reply);
        stream.write_all(&frame).await.unwrap();
    }

    fn ed25519_public_x() -> String {
        let key = PrivateKey::from_openssh(SSH_ED25519_PRIVATE_KEY).unwrap();
        let ring_key = match key.key_data() {
            ssh_key::private::KeypairData::Ed25519(kp) => {
                Ed25519KeyPair::from_seed_unchecked(&kp.private.to_bytes()).unwrap()
            }
            _ => unreachable!(),
        };
        URL_SAFE_NO_PAD.encode(ring_key.public_key().as_ref())
    }

    #[tokio::test]
    async fn test_agent_signed_assertion_verifies() {
        let agent = FakeAgent::start(&[SSH_ED25519_PRIVATE_KEY], Behaviour::Sign);
        let signer = AssertionSigner::new(vec![], Some(agent.socket.clone()));

        let assertion = signer.sign("alice", DEX).await.unwrap();
        let token = assertion.token.expose_secret();

        token
            .assert_valid_jwt("EdDSA")
            .assert_signed_by(SSH_ED25519_FINGERPRINT)
            .assert_for_subject("alice");

        let decoding_key = DecodingKey::from_ed_components(&ed25519_public_x()).unwrap();
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_audience(&[DEX]);
        validation.set_issuer(&[DEX]);
        let decoded =
            jsonwebtoken::decode::<serde_json::Value>(token, &decoding_key, &validation).unwrap();
        assert_eq!(decoded.claims["sub"], "alice");
    }

    #[tokio::test]
    async fn test_agent_skips_unsupported_identities() {
        let agent = FakeAgent::start(
            &[SSH_ECDSA_PRIVATE_KEY, SSH_ED25519_PRIVATE_KEY],
            Behaviour::Sign,
        );

        match AgentKey::connect(&agent.socket).await {
            Probe::Found(key) => assert_eq!(key.key_id(), SSH_ED25519_FINGERPRINT),
            _ => panic!("expected the Ed25519 identity"),
        }
    }

    #[tokio::test]
    async fn test_agent_with_only_unsupported_identities() {
        let agent = FakeAgent::start(&[SSH_ECDSA_PRIVATE_KEY], Behaviour::Sign);

        match AgentKey::connect(&agent.socket).await {
            Probe::Unsupported(kind) => assert!(kind.starts_with("ecdsa")),
            _ => panic!("expected an unsupported identity"),
        }
    }

    #[tokio::test]
    async fn test_empty_or_absent_agent_is_missing() {
        let agent = FakeAgent::start(&[], Behaviour::Sign);
        assert!(matches!(
            AgentKey::connect(&agent.socket).await,
            Probe::Missing
        ));

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AgentKey::connect(&dir.path().join("no-agent.sock")).await,
            Probe::Missing
        ));
    }

    #[tokio::test]
    async fn test_agent_refusal_is_signing_failed() {
        let agent = FakeAgent::start(&[SSH_ED25519_PRIVATE_KEY], Behaviour::Refuse);
        let signer = AssertionSigner::new(vec![], Some(agent.socket.clone()));

        let err = signer.sign("alice", DEX).await.unwrap_err();

        assert!(matches!(err, ClientError::SigningFailed(_)));
    }

    #[test]
    fn test_truncated_message_is_rejected() {
        let mut buf = Bytes::from_static(&[0, 0, 0, 9, b'a', b'b']);
        assert!(take_string(&mut buf).is_err());
    }
}
