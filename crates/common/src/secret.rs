//! Secret types for values that must never reach a log line.
//!
//! Re-exports [`secrecy`]. Anything that can authenticate a caller goes in a
//! [`SecretString`]: OAuth client secrets, SSH-signed assertions, and the
//! identity tokens returned by the identity provider. `Debug` on these types
//! prints a redaction marker, so deriving `Debug` on a struct holding one is safe.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credentials {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let creds = Credentials {
//!     client_id: "k8sctl".to_string(),
//!     client_secret: SecretString::from("s3cr3t"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("s3cr3t"));
//! assert_eq!(creds.client_secret.expose_secret(), "s3cr3t");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
