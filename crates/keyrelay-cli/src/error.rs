//! Error types for the keyrelay CLI.

use thiserror::Error;

/// Errors that can occur in the CLI host.
#[derive(Debug, Error)]
pub enum CliError {
    /// I/O error (credential file operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Relay error.
    #[error(transparent)]
    Relay(#[from] keyrelay::RelayError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage error.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type alias using `CliError`.
pub type Result<T> = std::result::Result<T, CliError>;
