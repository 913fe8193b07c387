//! Protected API origin derivation and the in-scope request filter.

use url::{Origin, Url};

use crate::error::{RelayError, Result};

const APP_LABEL: &str = "app";
const API_LABEL: &str = "api";

/// Parse an origin string (`scheme://host[:port]`) into a base URL with an empty path.
///
/// # Errors
///
/// Returns a configuration error if the value is not an absolute URL with a host.
pub fn parse_origin(value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| RelayError::Configuration(format!("Invalid origin '{value}': {e}")))?;

    if url.host_str().is_none() {
        return Err(RelayError::Configuration(format!(
            "Origin '{value}' has no host"
        )));
    }

    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(RelayError::Configuration(format!(
            "Origin '{value}' is opaque"
        )));
    }

    Url::parse(&origin.ascii_serialization())
        .map_err(|e| RelayError::Configuration(format!("Invalid origin '{value}': {e}")))
}

/// Derive the protected API origin from the application's own origin.
///
/// The first host label equal to `app` is replaced with `api`; scheme and port
/// are kept. `https://app.example.com` becomes `https://api.example.com`.
///
/// # Errors
///
/// Returns a configuration error if the host carries no `app` label.
pub fn derive_api_origin(app_origin: &Url) -> Result<Url> {
    let host = app_origin.host_str().ok_or_else(|| {
        RelayError::Configuration(format!("Application origin '{app_origin}' has no host"))
    })?;

    let mut replaced = false;
    let labels: Vec<&str> = host
        .split('.')
        .map(|label| {
            if !replaced && label == APP_LABEL {
                replaced = true;
                API_LABEL
            } else {
                label
            }
        })
        .collect();

    if !replaced {
        return Err(RelayError::Configuration(format!(
            "Cannot derive API origin: host '{host}' has no '{APP_LABEL}.' label"
        )));
    }

    let mut api = app_origin.clone();
    api.set_host(Some(&labels.join(".")))
        .map_err(|e| RelayError::Configuration(format!("Invalid derived API host: {e}")))?;
    Ok(api)
}

/// Decides which outbound requests the relay takes responsibility for.
#[derive(Debug, Clone)]
pub struct Scope {
    api_origin: Origin,
    login_path: String,
}

impl Scope {
    /// Creates a scope covering `api_origin` except for `login_path`.
    pub fn new(api_origin: &Url, login_path: impl Into<String>) -> Self {
        Self {
            api_origin: api_origin.origin(),
            login_path: login_path.into(),
        }
    }

    /// Whether a request to `url` is in scope.
    pub fn contains(&self, url: &Url) -> bool {
        url.origin() == self.api_origin && url.path() != self.login_path
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_derive_api_origin() {
        let app = parse_origin("https://app.example.com").unwrap();
        let api = derive_api_origin(&app).unwrap();
        assert_eq!(api.origin().ascii_serialization(), "https://api.example.com");
    }

    #[test]
    fn test_derive_api_origin_keeps_port() {
        let app = parse_origin("http://app.localhost:8080").unwrap();
        let api = derive_api_origin(&app).unwrap();
        assert_eq!(api.origin().ascii_serialization(), "http://api.localhost:8080");
    }

    #[test]
    fn test_derive_api_origin_requires_app_label() {
        let app = parse_origin("https://myapp.example.com").unwrap();
        assert!(derive_api_origin(&app).is_err());
    }

    #[test]
    fn test_parse_origin_strips_path() {
        let origin = parse_origin("https://app.example.com/some/page?q=1").unwrap();
        assert_eq!(origin.as_str(), "https://app.example.com/");
        assert!(parse_origin("not a url").is_err());
    }

    #[test]
    fn test_scope() {
        let api = parse_origin("https://api.example.com").unwrap();
        let scope = Scope::new(&api, "/auth/login");

        assert!(scope.contains(&Url::parse("https://api.example.com/foo").unwrap()));
        assert!(scope.contains(&Url::parse("https://api.example.com/auth/refresh").unwrap()));
        assert!(!scope.contains(&Url::parse("https://api.example.com/auth/login").unwrap()));
        assert!(!scope.contains(&Url::parse("http://www.example.com/foo").unwrap()));
        assert!(!scope.contains(&Url::parse("http://api.example.com/foo").unwrap()));
    }
}
