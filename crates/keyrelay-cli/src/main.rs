//! keyrelay CLI
//!
//! Hosts the relay in-process: seeds it from the credential file, waits for
//! installation and activation, issues requests through the relay client, and
//! persists every credential broadcast back to the file.

mod config;
mod error;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyrelay::{LocalClients, Relay};
use tracing::{error, info, warn};

use crate::config::CliConfig;
use crate::storage::{CredentialFile, StorageOwner};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (default: ~/.config/keyrelay/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a request through the relay and print the response
    Fetch {
        /// Request URL
        url: String,

        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
    },

    /// Show which credentials are stored and the protected API origin
    Status,
}

/// Initializes structured logging with tracing.
///
/// Supports two output formats via `KEYRELAY_LOG_FORMAT` environment variable:
/// - `json`: Machine-readable JSON logs
/// - `pretty`: Human-readable formatted logs (default)
///
/// Log level is controlled via `RUST_LOG` environment variable.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let format = std::env::var("KEYRELAY_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string())
        .to_lowercase();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("keyrelay=warn,keyrelay_cli=info"));

    match format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

async fn fetch(config: &CliConfig, url: &str, method: &str) -> Result<()> {
    let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method '{method}'"))?;
    let file = CredentialFile::new(config.storage_path()?, &config.storage);

    let host = LocalClients::new();
    let owner = StorageOwner::spawn(file.clone(), host.connect());

    let relay = Relay::new(&config.relay, Arc::new(host))?;

    // No request may leave before the relay is installed and active.
    relay.install().await?;
    let clients = relay.activate().await?;
    info!(clients, "Relay active");

    let seeded = relay
        .tokens()
        .on_message(&file.bootstrap_message(&config.relay.app_origin)?);
    if !seeded {
        warn!(path = %file.path().display(), "No stored credentials found");
    }

    let outcome = relay.client().request(method, url).send().await;

    relay.flush().await;
    drop(relay);
    let applied = owner.finish().await?;
    info!(applied, "Credential updates persisted");

    let response = outcome.map_err(|e| {
        error!("Request failed: {e}");
        e
    })?;
    let status = response.status();
    let body = response.text().await?;

    println!("{status}");
    if !body.is_empty() {
        println!("{body}");
    }
    Ok(())
}

fn status(config: &CliConfig) -> Result<()> {
    let file = CredentialFile::new(config.storage_path()?, &config.storage);
    let stored = file.read()?;
    let resolved = config.relay.resolve()?;

    let describe = |value: Option<&str>| match value {
        Some(value) if !value.is_empty() => "present",
        _ => "absent",
    };

    println!("credential file: {}", file.path().display());
    println!("api origin:      {}", resolved.api_origin.origin().ascii_serialization());
    println!("access token:    {}", describe(stored.access.as_deref()));
    println!("refresh token:   {}", describe(stored.refresh.as_deref()));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = CliConfig::load(args.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {e}");
        e
    })?;

    match args.command {
        Command::Fetch { url, method } => fetch(&config, &url, &method).await,
        Command::Status => status(&config),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use keyrelay::CredentialUpdate;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config_for(api: &MockServer, dir: &tempfile::TempDir) -> CliConfig {
        CliConfig::from_toml_str(&format!(
            r#"
[relay]
app_origin = "https://app.example.com"
api_origin = "{}"

[storage]
path = "{}"
            "#,
            api.uri(),
            dir.path().join("credentials.json").display()
        ))
        .unwrap()
    }

    #[test]
    fn test_parse_args() {
        let args = Args::parse_from(["keyrelay", "fetch", "https://api.example.com/foo"]);
        assert!(matches!(
            args.command,
            Command::Fetch { ref method, .. } if method == "GET"
        ));

        let args = Args::parse_from(["keyrelay", "--config", "/tmp/c.toml", "status"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(args.command, Command::Status));
    }

    #[tokio::test]
    async fn test_fetch_persists_refreshed_pair() {
        let api = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(header("authorization", "Bearer rst987"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access": "newAcc",
                "refresh": "newRef",
            })))
            .expect(1)
            .mount(&api)
            .await;
        Mock::given(method("GET"))
            .and(path("/foo"))
            .and(header("authorization", "Bearer newAcc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .expect(1)
            .mount(&api)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&api, &dir);
        let file = CredentialFile::new(config.storage_path().unwrap(), &config.storage);
        file.apply(&CredentialUpdate::refresh("rst987")).unwrap();

        fetch(&config, &format!("{}/foo", api.uri()), "get")
            .await
            .unwrap();

        let stored = file.read().unwrap();
        assert_eq!(stored.access.as_deref(), Some("newAcc"));
        assert_eq!(stored.refresh.as_deref(), Some("newRef"));
    }

    #[tokio::test]
    async fn test_fetch_voids_rejected_credentials() {
        let api = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired refresh token"))
            .mount(&api)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&api, &dir);
        let file = CredentialFile::new(config.storage_path().unwrap(), &config.storage);
        file.apply(&CredentialUpdate::refresh("rst987")).unwrap();

        let err = fetch(&config, &format!("{}/foo", api.uri()), "GET")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expired refresh token"));

        assert_eq!(file.read().unwrap(), CredentialUpdate::default());
    }
}
