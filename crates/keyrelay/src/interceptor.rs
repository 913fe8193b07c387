//! Credential-attaching request middleware.
//!
//! Requests outside the protected API (or to its login path) go straight to
//! the next handler. In-scope requests carry `Authorization: Bearer <access>`;
//! a 401 triggers one session refresh and one replay of the original request.

use std::sync::Arc;

use async_trait::async_trait;
use http::Extensions;
use log::{debug, error, warn};
use reqwest::header::{AUTHORIZATION, HeaderValue, ORIGIN, REFERER};
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};
use secrecy::ExposeSecret;
use url::Url;

use crate::abort::AbortController;
use crate::error::RelayError;
use crate::origin::Scope;
use crate::refresh::RefreshCoordinator;
use crate::tokens::TokenStore;

/// Middleware attaching credentials to protected API requests.
#[derive(Clone)]
pub struct RequestInterceptor {
    scope: Scope,
    app_origin: Url,
    tokens: Arc<TokenStore>,
    refresher: RefreshCoordinator,
}

impl RequestInterceptor {
    /// Creates an interceptor for requests within `scope`.
    pub fn new(
        scope: Scope,
        app_origin: Url,
        tokens: Arc<TokenStore>,
        refresher: RefreshCoordinator,
    ) -> Self {
        Self {
            scope,
            app_origin,
            tokens,
            refresher,
        }
    }

    /// Whether a request to `url` is handled by this interceptor.
    pub fn intercepts(&self, url: &Url) -> bool {
        self.scope.contains(url)
    }

    fn authorize(&self, mut request: Request) -> Result<Request, RelayError> {
        let mut bearer =
            HeaderValue::from_str(&format!("Bearer {}", self.tokens.access().expose_secret()))
                .map_err(|_| {
                    RelayError::Configuration(
                        "access credential is not a valid header value".to_string(),
                    )
                })?;
        bearer.set_sensitive(true);

        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        if let Ok(origin) = HeaderValue::from_str(&self.app_origin.origin().ascii_serialization())
        {
            headers.entry(ORIGIN).or_insert(origin);
        }
        if let Ok(referrer) = HeaderValue::from_str(self.app_origin.as_str()) {
            headers.entry(REFERER).or_insert(referrer);
        }
        Ok(request)
    }

    async fn fulfil<'a>(
        &'a self,
        original: Request,
        extensions: &'a mut Extensions,
        next: Next<'a>,
    ) -> reqwest_middleware::Result<Response> {
        let url = original.url().to_string();
        let mut pending = original;
        let mut refreshed = false;

        loop {
            let signal = AbortController::new();

            if !self.tokens.has_access() {
                if refreshed {
                    return Err(RelayError::Unauthorized { url }.into());
                }
                debug!("No access credential held; refreshing before {url}");
                self.refresher
                    .refresh(&signal)
                    .await
                    .map_err(RelayError::from)?;
                refreshed = true;
            }

            let replay = pending.try_clone();
            let request = self.authorize(pending)?;
            let response = signal
                .run(next.clone().run(request, extensions))
                .await
                .map_err(|reason| RelayError::Aborted { reason })??;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            if refreshed {
                warn!("Request to {url} still unauthorized after session refresh");
                return Err(RelayError::Unauthorized { url }.into());
            }

            let Some(replay) = replay else {
                warn!("Request to {url} unauthorized but its body cannot be replayed");
                return Ok(response);
            };

            debug!("Request to {url} unauthorized; refreshing session and retrying");
            self.refresher
                .refresh(&signal)
                .await
                .map_err(RelayError::from)?;
            refreshed = true;
            pending = replay;
        }
    }
}

#[async_trait]
impl Middleware for RequestInterceptor {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        if !self.intercepts(req.url()) {
            return next.run(req, extensions).await;
        }

        let url = req.url().clone();
        self.fulfil(req, extensions, next).await.map_err(|e| {
            error!("Intercepted request to {url} failed: {e}");
            e
        })
    }
}
