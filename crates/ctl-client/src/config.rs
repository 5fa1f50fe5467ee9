//! k8sctl client configuration.
//!
//! Settings are resolved once per invocation with the precedence
//! explicit flag > environment variable > config file > built-in default.
//!
//! The config file maps cluster names to environments and server URLs:
//!
//! ```yaml
//! default_environment: dev
//! dex_url: https://dex.example.com
//! clusters:
//!   prod-east:
//!     environment: prod
//!     server_url: https://k8sctl-prod-east.example.com
//! ```

use crate::errors::ClientError;
use common::secret::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// OAuth2 client id used when none is configured.
pub const DEFAULT_CLIENT_ID: &str = "k8sctl";

/// Environment assumed when no config file exists.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// Default timeout for authenticated requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 300;

pub const DEFAULT_API_VERSION: &str = "v1";

/// Key files tried when no explicit key is given, relative to `~/.ssh`.
pub const DEFAULT_KEY_FILES: &[&str] = &["id_ed25519", "id_rsa"];

/// Per-cluster entry of the config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ClusterEntry {
    /// Environment suffix (`dev`, `staging`, `prod`, ...).
    #[serde(default)]
    pub environment: String,

    #[serde(default)]
    pub server_url: Option<String>,
}

/// Parsed config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterFile {
    #[serde(default)]
    pub clusters: HashMap<String, ClusterEntry>,

    #[serde(default)]
    pub default_environment: Option<String>,

    #[serde(default)]
    pub dex_url: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub username: Option<String>,
}

impl ClusterFile {
    /// Parse a config file.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;

        serde_yaml::from_str(&contents).map_err(|e| {
            ClientError::Config(format!("failed to parse config file {}: {e}", path.display()))
        })
    }

    /// Load the first config file found.
    ///
    /// `K8SCTL_CONFIG` wins and must exist. Otherwise `./k8sctl.yaml`,
    /// `~/.config/k8sctl/config.yaml` and `/etc/k8sctl/config.yaml` are tried
    /// in order. Finding none is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the chosen file cannot be loaded.
    pub fn discover(vars: &HashMap<String, String>) -> Result<Self, ClientError> {
        if let Some(path) = non_empty(vars, "K8SCTL_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let mut candidates = vec![PathBuf::from("./k8sctl.yaml")];
        if let Some(home) = home_dir(vars) {
            candidates.push(home.join(".config").join("k8sctl").join("config.yaml"));
        }
        candidates.push(PathBuf::from("/etc/k8sctl/config.yaml"));

        match candidates.iter().find(|p| p.is_file()) {
            Some(path) => {
                tracing::debug!(target: "client.config", path = %path.display(), "Using config file");
                Self::load(path)
            }
            None => Ok(Self::fallback()),
        }
    }

    /// The mapping used when no config file exists.
    pub fn fallback() -> Self {
        Self {
            default_environment: Some(DEFAULT_ENVIRONMENT.to_string()),
            ..Self::default()
        }
    }

    /// Environment for `cluster`: its mapping, else the default environment,
    /// else the cluster name itself.
    pub fn environment_for(&self, cluster: &str) -> String {
        if let Some(entry) = self.clusters.get(cluster) {
            return entry.environment.clone();
        }

        match self.default_environment.as_deref() {
            Some(env) if !env.is_empty() => env.to_string(),
            _ => cluster.to_string(),
        }
    }

    pub fn server_url_for(&self, cluster: &str) -> Option<&str> {
        self.clusters
            .get(cluster)
            .and_then(|entry| entry.server_url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct ClientOverrides {
    pub cluster: Option<String>,
    pub dex_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub ssh_keys: Vec<PathBuf>,
    pub timeout_seconds: Option<u64>,
    pub api_version: Option<String>,
}

/// Fully resolved client settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub cluster: Option<String>,

    /// Identity-provider URL. Issuer and audience of the SSH assertion.
    pub dex_url: String,

    pub client_id: String,
    pub client_secret: Option<SecretString>,

    /// Subject of the SSH assertion.
    pub username: String,

    /// Audience requested for the exchanged token.
    pub target_audience: String,

    /// Base URL of the k8sctl service, without trailing slash.
    pub server_url: String,

    pub api_version: String,

    /// Candidate key files.
    pub ssh_key_paths: Vec<PathBuf>,

    /// When set, only `ssh_key_paths` are used and the agent is skipped.
    pub explicit_keys: bool,

    /// `SSH_AUTH_SOCK`, if any.
    pub agent_socket: Option<PathBuf>,

    pub request_timeout: Duration,
}

impl ClientSettings {
    /// Resolve settings from the process environment and the discovered config file.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` on an unreadable config file or missing
    /// identity-provider URL or username.
    pub fn from_env(overrides: ClientOverrides) -> Result<Self, ClientError> {
        let vars: HashMap<String, String> = env::vars().collect();
        let file = ClusterFile::discover(&vars)?;
        Self::resolve(overrides, &vars, &file)
    }

    /// Resolve settings from explicit inputs.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` when no identity-provider URL or no
    /// username can be determined.
    pub fn resolve(
        overrides: ClientOverrides,
        vars: &HashMap<String, String>,
        file: &ClusterFile,
    ) -> Result<Self, ClientError> {
        let cluster = overrides.cluster.filter(|c| !c.is_empty());

        let dex_url = first_of([
            overrides.dex_url,
            non_empty(vars, "DEX_URL"),
            file.dex_url.clone(),
        ])
        .ok_or_else(|| {
            ClientError::Config(
                "identity provider URL not set (use --dex-url, DEX_URL or dex_url in the config file)"
                    .to_string(),
            )
        })?;

        let client_id = first_of([
            overrides.client_id,
            non_empty(vars, "K8SCTL_CLIENT_ID"),
            file.client_id.clone(),
        ])
        .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let client_secret = first_of([
            overrides.client_secret,
            non_empty(vars, "K8SCTL_CLIENT_SECRET"),
            file.client_secret.clone(),
        ])
        .map(SecretString::from);

        let username = first_of([
            overrides.username,
            non_empty(vars, "KUBECTL_SSH_USER"),
            file.username.clone(),
            non_empty(vars, "USER"),
            non_empty(vars, "LOGNAME"),
        ])
        .or_else(system_account_name)
        .ok_or_else(|| {
            ClientError::Config(
                "could not determine username (use --username or KUBECTL_SSH_USER)".to_string(),
            )
        })?;

        let suffix = cluster
            .as_deref()
            .map(|name| cluster_suffix(name, vars, file));

        let target_audience = match (non_empty(vars, "K8SCTL_AUDIENCE"), &suffix) {
            (Some(audience), _) => audience,
            (None, Some(suffix)) => service_url(suffix),
            (None, None) => service_url(DEFAULT_ENVIRONMENT),
        };

        let server_url = non_empty(vars, "K8SCTL_SERVER_URL")
            .or_else(|| {
                cluster
                    .as_deref()
                    .and_then(|name| file.server_url_for(name))
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| service_url(suffix.as_deref().unwrap_or(DEFAULT_ENVIRONMENT)))
            .trim_end_matches('/')
            .to_string();

        let mut ssh_key_paths = overrides.ssh_keys;
        if ssh_key_paths.is_empty() {
            if let Some(keys) = non_empty(vars, "K8SCTL_SSH_KEYS") {
                ssh_key_paths = keys
                    .split(':')
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect();
            }
        }
        let explicit_keys = !ssh_key_paths.is_empty();
        if !explicit_keys {
            if let Some(home) = home_dir(vars) {
                let ssh_dir = home.join(".ssh");
                ssh_key_paths = DEFAULT_KEY_FILES.iter().map(|f| ssh_dir.join(f)).collect();
            }
        }

        let agent_socket = non_empty(vars, "SSH_AUTH_SOCK").map(PathBuf::from);

        let request_timeout = Duration::from_secs(
            overrides
                .timeout_seconds
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS),
        );

        let api_version = overrides
            .api_version
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        Ok(Self {
            cluster,
            dex_url,
            client_id,
            client_secret,
            username,
            target_audience,
            server_url,
            api_version,
            ssh_key_paths,
            explicit_keys,
            agent_socket,
            request_timeout,
        })
    }
}

/// Environment suffix for `cluster`: `K8SCTL_CLUSTER_SUFFIX`, else the config file.
fn cluster_suffix(cluster: &str, vars: &HashMap<String, String>, file: &ClusterFile) -> String {
    non_empty(vars, "K8SCTL_CLUSTER_SUFFIX").unwrap_or_else(|| file.environment_for(cluster))
}

fn service_url(suffix: &str) -> String {
    format!("https://k8sctl-{suffix}.example.com")
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name).filter(|v| !v.is_empty()).cloned()
}

fn first_of<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates.into_iter().flatten().find(|v| !v.is_empty())
}

/// Login name of the account running this process, from the password database.
#[cfg(unix)]
pub fn system_account_name() -> Option<String> {
    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    let mut buf: Vec<libc::c_char> = vec![0; 1024];

    loop {
        // SAFETY: all-zero is a valid `passwd`; every pointer field is null.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        // SAFETY: `pwd`, `buf` and `result` outlive the call and `buf.len()`
        // is the size of `buf`. On success `pwd.pw_name` points into `buf`.
        let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };

        if rc == libc::ERANGE && buf.len() < 64 * 1024 {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
            tracing::debug!(target: "client.config", uid, rc, "No password database entry for current user");
            return None;
        }

        // SAFETY: checked non-null above; NUL-terminated within `buf`.
        let name = unsafe { std::ffi::CStr::from_ptr(pwd.pw_name) };
        return name
            .to_str()
            .ok()
            .filter(|n| !n.is_empty())
            .map(ToString::to_string);
    }
}

#[cfg(not(unix))]
pub fn system_account_name() -> Option<String> {
    None
}

fn home_dir(vars: &HashMap<String, String>) -> Option<PathBuf> {
    non_empty(vars, "HOME").map(PathBuf::from).or_else(dirs::home_dir)
}
