//! CLI configuration.
//!
//! Configuration is loaded from `~/.config/keyrelay/config.toml` unless
//! `--config` points elsewhere.
//!
//! ## Example Configuration
//!
//! ```toml
//! [relay]
//! app_origin = "https://app.example.com"
//! timeout_seconds = 30
//!
//! [storage]
//! path = "/home/me/.local/share/keyrelay/credentials.json"
//! access_key = "access_token"
//! refresh_key = "refresh_token"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use keyrelay::RelayConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

/// CLI configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Relay settings
    pub relay: RelayConfig,

    /// Durable credential storage settings
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Where and under which keys credentials are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Credential file (default: `~/.local/share/keyrelay/credentials.json`)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Key of the access credential (default: `access_token`)
    #[serde(default = "default_access_key")]
    pub access_key: String,

    /// Key of the refresh credential (default: `refresh_token`)
    #[serde(default = "default_refresh_key")]
    pub refresh_key: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: None,
            access_key: default_access_key(),
            refresh_key: default_refresh_key(),
        }
    }
}

fn default_access_key() -> String {
    "access_token".to_string()
}

fn default_refresh_key() -> String {
    "refresh_token".to_string()
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config directory cannot be determined
    /// - The file doesn't exist
    /// - Deserialization or validation fails
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if !path.exists() {
            return Err(CliError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| CliError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml_str(&contents)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization or validation fails.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the default configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CliError::Config("Failed to determine config directory".to_string()))?
            .join("keyrelay");

        Ok(config_dir.join("config.toml"))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay settings are invalid or the storage keys
    /// are empty or equal.
    pub fn validate(&self) -> Result<()> {
        self.relay.validate()?;

        let storage = &self.storage;
        if storage.access_key.is_empty() || storage.refresh_key.is_empty() {
            return Err(CliError::Config(
                "Storage keys must not be empty".to_string(),
            ));
        }
        if storage.access_key == storage.refresh_key {
            return Err(CliError::Config(format!(
                "Storage keys must differ (both are '{}')",
                storage.access_key
            )));
        }

        Ok(())
    }

    /// Resolves the credential file path.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the data directory
    /// cannot be determined.
    pub fn storage_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| CliError::Storage("Failed to determine data directory".to_string()))?
            .join("keyrelay");

        Ok(data_dir.join("credentials.json"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_config() {
        let config = CliConfig::from_toml_str(
            r#"
[relay]
app_origin = "https://app.example.com"

[storage]
path = "/tmp/credentials.json"
access_key = "acc"
            "#,
        )
        .unwrap();

        assert_eq!(config.relay.app_origin, "https://app.example.com");
        assert_eq!(config.storage.access_key, "acc");
        assert_eq!(config.storage.refresh_key, "refresh_token");
        assert_eq!(
            config.storage_path().unwrap(),
            PathBuf::from("/tmp/credentials.json")
        );
    }

    #[test]
    fn test_default_storage_settings() {
        let config = CliConfig::from_toml_str(
            r#"
[relay]
app_origin = "https://app.example.com"
            "#,
        )
        .unwrap();

        assert!(config.storage.path.is_none());
        assert_eq!(config.storage.access_key, "access_token");
        assert_eq!(config.storage.refresh_key, "refresh_token");
    }

    #[test]
    fn test_validate_duplicate_keys() {
        let toml = r#"
[relay]
app_origin = "https://app.example.com"

[storage]
access_key = "token"
refresh_key = "token"
        "#;

        assert!(CliConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_validate_relay_settings() {
        let toml = r#"
[relay]
app_origin = "https://www.example.com"
        "#;

        assert!(matches!(
            CliConfig::from_toml_str(toml),
            Err(CliError::Relay(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = CliConfig::load(Some(Path::new("/nonexistent/config.toml"))).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}
