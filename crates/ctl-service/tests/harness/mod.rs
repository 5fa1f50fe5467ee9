//! Test server harness for ctl-service integration tests.
//!
//! Spawns the real router on `127.0.0.1:0`, backed by a [`JwksStore`]
//! pointed at a [`MockIdentityProvider`].

#![allow(dead_code)]

use axum::Router;
use ctl_service::auth::{JwksStore, TokenValidator};
use ctl_service::config::Config;
use ctl_service::observability::metrics::init_metrics_recorder;
use ctl_service::routes::{self, AppState};
use ctl_test_utils::MockIdentityProvider;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

pub const AUDIENCE: &str = "https://k8sctl-dev.example.com";

/// Global metrics handle for test servers
static TEST_METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
    OnceLock::new();

fn get_test_metrics_handle() -> metrics_exporter_prometheus::PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder().unwrap_or_else(|_| {
                metrics_exporter_prometheus::PrometheusBuilder::new()
                    .build_recorder()
                    .handle()
            })
        })
        .clone()
}

/// Base configuration for a server trusting `idp`.
pub fn test_config(idp: &MockIdentityProvider) -> Result<Config, anyhow::Error> {
    let vars = HashMap::from([
        ("OIDC_ISSUER_URL".to_string(), idp.issuer()),
        ("OIDC_AUDIENCE".to_string(), AUDIENCE.to_string()),
        (
            "OIDC_ALLOWED_GROUPS".to_string(),
            "engineering, sre".to_string(),
        ),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
    ]);

    Config::from_vars(&vars).map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))
}

/// Running ctl-service instance.
pub struct TestCtlServer {
    addr: SocketAddr,
    jwks: Arc<JwksStore>,
    _handle: JoinHandle<()>,
}

impl TestCtlServer {
    /// Spawn with the default test configuration and no extra protected routes.
    pub async fn spawn(idp: &MockIdentityProvider) -> Result<Self, anyhow::Error> {
        Self::spawn_with(test_config(idp)?, Router::new()).await
    }

    /// Spawn with an explicit configuration and extra routes under `/v1`.
    pub async fn spawn_with(config: Config, protected: Router) -> Result<Self, anyhow::Error> {
        let jwks = JwksStore::start(config.auth.jwks_url(), config.jwks.clone()).await;
        let validator = Arc::new(TokenValidator::new(config.auth.clone(), jwks.clone()));

        let state = Arc::new(AppState {
            config,
            validator,
            jwks: jwks.clone(),
        });

        let app = routes::build_routes(state, get_test_metrics_handle(), protected);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            jwks,
            _handle: handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn jwks(&self) -> &Arc<JwksStore> {
        &self.jwks
    }
}

impl Drop for TestCtlServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
