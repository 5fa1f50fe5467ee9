//! k8sctl
//!
//! Authenticates to the k8sctl service with the caller's SSH key.

use clap::{Parser, Subcommand};
use common::secret::ExposeSecret;
use ctl_client::{authenticate, AuthenticatedClient, ClientOverrides, ClientSettings};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "k8sctl", version, about = "Authenticate to the k8sctl service with an SSH key")]
struct Cli {
    /// Target cluster; selects the service audience and URL
    #[arg(short = 'c', long, global = true)]
    cluster: Option<String>,

    /// Identity provider (Dex) URL
    #[arg(short = 'd', long, global = true)]
    dex_url: Option<String>,

    /// OAuth2 client id
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// OAuth2 client secret
    #[arg(long, global = true)]
    client_secret: Option<String>,

    /// Username to authenticate as
    #[arg(short = 'u', long, global = true)]
    username: Option<String>,

    /// SSH private key file; repeatable. Disables ssh-agent lookup
    #[arg(long = "ssh-key", global = true)]
    ssh_keys: Vec<PathBuf>,

    /// Timeout for requests to the service
    #[arg(long, global = true)]
    timeout_seconds: Option<u64>,

    /// Service API version
    #[arg(long, global = true, default_value = "v1")]
    api_version: String,

    /// Print the bearer token used
    #[arg(long, global = true)]
    show_token: bool,

    /// Debug logging on stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify that the service accepts our identity
    AuthCheck,
    /// Print a fresh bearer token
    Token,
}

impl Cli {
    fn overrides(&self) -> ClientOverrides {
        ClientOverrides {
            cluster: self.cluster.clone(),
            dex_url: self.dex_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            username: self.username.clone(),
            ssh_keys: self.ssh_keys.clone(),
            timeout_seconds: self.timeout_seconds,
            api_version: Some(self.api_version.clone()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "k8sctl=debug,ctl_client=debug,client=debug"
    } else {
        "k8sctl=warn,ctl_client=warn,client=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = ClientSettings::from_env(cli.overrides())?;
    debug!(
        cluster = ?settings.cluster,
        dex_url = %settings.dex_url,
        audience = %settings.target_audience,
        server_url = %settings.server_url,
        "Resolved client settings"
    );

    let token = authenticate(&settings).await?;

    match cli.command {
        Command::Token => {
            println!("{}", token.expose_secret());
            Ok(ExitCode::SUCCESS)
        }
        Command::AuthCheck => {
            if cli.show_token {
                println!("token: {}", token.expose_secret());
            }

            let client = AuthenticatedClient::from_settings(&settings, token)?;
            let path = format!("/{}/auth-check", settings.api_version);
            let response = client.send(reqwest::Method::POST, &path, None).await?;

            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::OK {
                println!("{body}");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("auth-check failed ({status}): {body}");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
