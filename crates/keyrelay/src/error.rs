//! Error types for the relay.

use thiserror::Error;

/// Reason attached to the cancellation token when a refresh is attempted
/// without a refresh credential.
pub const REFRESH_TOKEN_MISSING: &str = "token refresh aborted (refresh token missing)";

/// Outcome of a failed refresh exchange.
///
/// Every caller waiting on the same in-flight refresh observes a clone of the
/// same value, so this type carries only owned, cloneable data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RefreshError {
    /// The refresh endpoint answered with a non-success status.
    ///
    /// A 401 here also voids both stored credentials.
    #[error("Session refresh rejected ({status}): {status_text}")]
    Rejected {
        /// HTTP status code of the exchange.
        status: u16,
        /// Response body text, or the canonical reason phrase when the body is empty.
        status_text: String,
    },

    /// The exchange was cancelled before it could complete.
    #[error("AbortError: {reason}")]
    Aborted {
        /// The reason the cancellation token was aborted with.
        reason: String,
    },

    /// The exchange could not reach the refresh endpoint.
    #[error("Refresh exchange failed: {0}")]
    Transport(String),

    /// The refresh endpoint answered 2xx with a body that is not a credential pair.
    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),
}

impl RefreshError {
    /// Whether the refresh endpoint rejected the refresh credential itself.
    pub const fn is_authentication_rejection(&self) -> bool {
        matches!(self, Self::Rejected { status: 401, .. })
    }
}

/// Errors surfaced by the relay.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RelayError {
    /// Session refresh failed; the original request was not retried.
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// The dispatched request was cancelled through its cancellation token.
    #[error("AbortError: {reason}")]
    Aborted {
        /// The reason the cancellation token was aborted with.
        reason: String,
    },

    /// The protected API still answered 401 after a successful refresh.
    #[error("Authentication error: request to {url} rejected after session refresh")]
    Unauthorized {
        /// The URL of the rejected request.
        url: String,
    },

    /// Network or HTTP client failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid origin, path or other configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The hosting runtime failed a lifecycle or messaging call.
    #[error("Host error: {0}")]
    Host(String),
}

/// Result type alias using `RelayError`.
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Check if this error represents a cancelled operation.
    ///
    /// Some transports report a cancellation as a plain network failure, so the
    /// message text is inspected as well as the variant.
    pub fn is_abort(&self) -> bool {
        match self {
            Self::Aborted { .. } | Self::Refresh(RefreshError::Aborted { .. }) => true,
            other => {
                let message = other.to_string().to_lowercase();
                message.contains("aborted") && message.contains("refresh token")
            }
        }
    }

    /// Check if this error means the session cannot be recovered without a new login.
    pub const fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. }
                | Self::Refresh(RefreshError::Rejected { status: 401, .. })
        )
    }

    /// Extract a relay error carried inside a middleware error, if any.
    pub fn from_middleware(err: &reqwest_middleware::Error) -> Option<&Self> {
        if let reqwest_middleware::Error::Middleware(inner) = err {
            inner.downcast_ref::<Self>()
        } else {
            None
        }
    }
}

impl From<RelayError> for reqwest_middleware::Error {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Network(inner) => Self::Reqwest(inner),
            other => Self::Middleware(anyhow::Error::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_abort_is_abort() {
        let err = RelayError::from(RefreshError::Aborted {
            reason: REFRESH_TOKEN_MISSING.to_string(),
        });
        assert!(err.is_abort());
        let message = err.to_string();
        assert!(message.contains("aborted"));
        assert!(message.contains("refresh token"));
        assert!(message.contains("missing"));
    }

    #[test]
    fn test_abort_matched_by_reason_text() {
        let err = RelayError::Host(format!("fetch failed: {REFRESH_TOKEN_MISSING}"));
        assert!(err.is_abort());
        assert!(!RelayError::Host("connection reset".to_string()).is_abort());
    }

    #[test]
    fn test_authentication_error() {
        let rejected = RelayError::from(RefreshError::Rejected {
            status: 401,
            status_text: "expired refresh token".to_string(),
        });
        assert!(rejected.is_authentication_error());
        assert!(rejected.to_string().contains("expired refresh token"));

        let unavailable = RelayError::from(RefreshError::Rejected {
            status: 503,
            status_text: "Service Unavailable".to_string(),
        });
        assert!(!unavailable.is_authentication_error());
    }

    #[test]
    fn test_round_trip_through_middleware_error() {
        let err: reqwest_middleware::Error = RelayError::Unauthorized {
            url: "https://api.example.com/foo".to_string(),
        }
        .into();
        let relay = RelayError::from_middleware(&err);
        assert!(matches!(relay, Some(RelayError::Unauthorized { .. })));
    }
}
