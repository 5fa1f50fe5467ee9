//! OpenSSH key fixtures for the assertion signer.
//!
//! Generated once with `ssh-keygen -C alice@workstation` and checked in, so
//! tests can compare against the fingerprints `ssh-keygen -l` prints.

use std::path::{Path, PathBuf};

/// Unencrypted Ed25519 private key (OpenSSH format).
pub const SSH_ED25519_PRIVATE_KEY: &str = include_str!("../fixtures/ssh_ed25519");

/// Public half of [`SSH_ED25519_PRIVATE_KEY`] (authorized_keys format).
pub const SSH_ED25519_PUBLIC_KEY: &str = include_str!("../fixtures/ssh_ed25519.pub");

/// `ssh-keygen -l -E sha256` fingerprint of [`SSH_ED25519_PUBLIC_KEY`].
pub const SSH_ED25519_FINGERPRINT: &str = "SHA256:ftC0JPbq94e69UkkQCCQwJDu2UiQWOa1DscJiH5Y+hc";

/// Unencrypted RSA-2048 private key (OpenSSH format).
pub const SSH_RSA_PRIVATE_KEY: &str = include_str!("../fixtures/ssh_rsa");

/// Public half of [`SSH_RSA_PRIVATE_KEY`].
pub const SSH_RSA_PUBLIC_KEY: &str = include_str!("../fixtures/ssh_rsa.pub");

/// `ssh-keygen -l -E sha256` fingerprint of [`SSH_RSA_PUBLIC_KEY`].
pub const SSH_RSA_FINGERPRINT: &str = "SHA256:MgOXSJhzjMP8WICxYbybPoIAc6Oc+QRuSqq2xCZVDfM";

/// Ed25519 private key protected by the passphrase `hunter2`.
pub const SSH_ED25519_ENCRYPTED_PRIVATE_KEY: &str =
    include_str!("../fixtures/ssh_ed25519_encrypted");

/// Unencrypted ECDSA P-256 private key; not a supported assertion key type.
pub const SSH_ECDSA_PRIVATE_KEY: &str = include_str!("../fixtures/ssh_ecdsa");

/// [`SSH_RSA_PRIVATE_KEY`] with its second prime replaced by the first.
///
/// Still parses as an OpenSSH RSA key, but the components no longer multiply
/// out to the modulus, so it cannot sign.
pub fn inconsistent_rsa_private_key() -> String {
    use ssh_key::private::KeypairData;
    use ssh_key::{LineEnding, PrivateKey};

    let good = PrivateKey::from_openssh(SSH_RSA_PRIVATE_KEY).expect("RSA fixture parses");
    let mut keypair = good.key_data().rsa().expect("RSA fixture").clone();
    keypair.private.q = keypair.private.p.clone();

    PrivateKey::new(KeypairData::Rsa(keypair), "alice@workstation")
        .and_then(|key| key.to_openssh(LineEnding::LF))
        .expect("Failed to encode RSA fixture")
        .to_string()
}

/// Write `contents` to `dir/name` with owner-only permissions and return the path.
pub fn write_key_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("Failed to write key fixture");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .expect("Failed to chmod key fixture");
    }

    path
}
