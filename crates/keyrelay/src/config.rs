//! Relay configuration.
//!
//! ## Example Configuration
//!
//! ```toml
//! app_origin = "https://app.example.com"
//! # api_origin = "https://api.example.com"   # derived from app_origin when omitted
//! login_path = "/auth/login"
//! refresh_path = "/auth/refresh"
//! timeout_seconds = 30
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RelayError, Result};
use crate::origin::{derive_api_origin, parse_origin};

/// Configuration for a [`Relay`](crate::Relay).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// The application's own origin; the trust origin for inbound sync messages.
    pub app_origin: String,

    /// Explicit protected API origin. Derived from `app_origin` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_origin: Option<String>,

    /// Unauthenticated login path, never intercepted (default: `/auth/login`)
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Refresh exchange path on the API origin (default: `/auth/refresh`)
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Timeout for the refresh exchange in seconds. `None` means no timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

/// Origins and endpoints after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// The application's own origin.
    pub app_origin: Url,
    /// The protected API origin.
    pub api_origin: Url,
    /// Absolute URL of the refresh exchange.
    pub refresh_url: Url,
    /// Path excluded from interception.
    pub login_path: String,
}

impl RelayConfig {
    /// Creates a configuration with default paths for the given application origin.
    pub fn new(app_origin: impl Into<String>) -> Self {
        Self {
            app_origin: app_origin.into(),
            api_origin: None,
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            timeout_seconds: None,
        }
    }

    /// Sets an explicit API origin instead of deriving it.
    #[must_use]
    pub fn with_api_origin(mut self, api_origin: impl Into<String>) -> Self {
        self.api_origin = Some(api_origin.into());
        self
    }

    /// Sets the refresh exchange timeout.
    #[must_use]
    pub const fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    /// Parses a configuration from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization or validation fails.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RelayError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An origin cannot be parsed or the API origin cannot be derived
    /// - A path does not start with `/`
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("login_path", &self.login_path),
            ("refresh_path", &self.refresh_path),
        ] {
            if !path.starts_with('/') {
                return Err(RelayError::Configuration(format!(
                    "{name} must start with '/': {path}"
                )));
            }
        }

        self.resolve().map(|_| ())
    }

    /// Resolves origins and the refresh endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if an origin is invalid or the API origin cannot be derived.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let app_origin = parse_origin(&self.app_origin)?;
        let api_origin = match &self.api_origin {
            Some(explicit) => parse_origin(explicit)?,
            None => derive_api_origin(&app_origin)?,
        };
        let refresh_url = api_origin.join(&self.refresh_path).map_err(|e| {
            RelayError::Configuration(format!("Invalid refresh path '{}': {e}", self.refresh_path))
        })?;

        Ok(ResolvedConfig {
            app_origin,
            api_origin,
            refresh_url,
            login_path: self.login_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_config() {
        let config = RelayConfig::from_toml_str(
            r#"
app_origin = "https://app.example.com"
login_path = "/session/login"
timeout_seconds = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.login_path, "/session/login");
        assert_eq!(config.refresh_path, "/auth/refresh");
        assert_eq!(config.timeout_seconds, Some(5));
    }

    #[test]
    fn test_resolve_derives_api_origin() {
        let resolved = RelayConfig::new("https://app.example.com").resolve().unwrap();
        assert_eq!(resolved.api_origin.as_str(), "https://api.example.com/");
        assert_eq!(
            resolved.refresh_url.as_str(),
            "https://api.example.com/auth/refresh"
        );
    }

    #[test]
    fn test_resolve_explicit_api_origin() {
        let resolved = RelayConfig::new("http://localhost:3000")
            .with_api_origin("http://127.0.0.1:4000")
            .resolve()
            .unwrap();
        assert_eq!(
            resolved.refresh_url.as_str(),
            "http://127.0.0.1:4000/auth/refresh"
        );
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let mut config = RelayConfig::new("https://app.example.com");
        config.refresh_path = "auth/refresh".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_underivable_origin() {
        let toml = r#"app_origin = "https://www.example.com""#;
        assert!(RelayConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = RelayConfig::load(Path::new("/nonexistent/keyrelay.toml")).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }
}
