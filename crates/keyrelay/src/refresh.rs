//! Single-flight session refresh.
//!
//! At most one refresh exchange runs at a time. Callers that arrive while an
//! exchange is in flight join it and observe the same outcome. The exchange
//! runs on its own task and clears the in-flight slot when it settles,
//! whatever the outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use hyper::ext::ReasonPhrase;
use log::{debug, error, warn};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CACHE_CONTROL, ORIGIN, REFERER};
use secrecy::ExposeSecret;
use serde::Deserialize;
use url::Url;

use crate::abort::AbortController;
use crate::config::ResolvedConfig;
use crate::error::{REFRESH_TOKEN_MISSING, RefreshError};
use crate::tokens::TokenStore;

type RefreshOutcome = Result<(), RefreshError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Success body of the refresh exchange.
#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    refresh: String,
}

struct InFlight {
    generation: u64,
    handle: SharedRefresh,
}

struct Inner {
    client: reqwest::Client,
    refresh_url: Url,
    app_origin: Url,
    tokens: Arc<TokenStore>,
    in_flight: Mutex<Option<InFlight>>,
    generations: AtomicU64,
}

/// Performs the refresh exchange on behalf of every concurrent caller.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Creates a coordinator posting to `config.refresh_url` with `client`.
    ///
    /// `client` should not carry the relay middleware.
    pub fn new(client: reqwest::Client, config: &ResolvedConfig, tokens: Arc<TokenStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                refresh_url: config.refresh_url.clone(),
                app_origin: config.app_origin.clone(),
                tokens,
                in_flight: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Refreshes the session, or joins the refresh already in flight.
    ///
    /// When no refresh credential is held, `signal` is aborted with
    /// [`REFRESH_TOKEN_MISSING`] before the exchange is attempted, so the
    /// exchange settles as [`RefreshError::Aborted`].
    ///
    /// # Errors
    ///
    /// Returns the shared [`RefreshError`] when the exchange fails.
    pub async fn refresh(&self, signal: &AbortController) -> RefreshOutcome {
        self.acquire(signal).await
    }

    /// Whether an exchange is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn acquire(&self, signal: &AbortController) -> SharedRefresh {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(in_flight) = slot.as_ref() {
            debug!("Joining in-flight session refresh");
            return in_flight.handle.clone();
        }

        if !self.inner.tokens.has_refresh() {
            warn!("No refresh credential held; aborting session refresh");
            signal.abort(REFRESH_TOKEN_MISSING);
        }

        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let task_signal = signal.clone();
        let task = tokio::spawn(async move {
            let outcome = inner.exchange(&task_signal).await;
            inner.settle(generation);
            outcome
        });

        let inner = Arc::clone(&self.inner);
        let handle = async move {
            task.await.unwrap_or_else(|e| {
                inner.settle(generation);
                Err(RefreshError::Transport(format!("refresh task failed: {e}")))
            })
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            generation,
            handle: handle.clone(),
        });
        handle
    }
}

/// The reason phrase sent by the server, else the body text, else the
/// canonical reason for `status`.
fn status_text(status: StatusCode, reason: Option<String>, body: &str) -> String {
    match reason {
        Some(reason) if !reason.trim().is_empty() => reason,
        _ if !body.is_empty() => body.to_string(),
        _ => status.canonical_reason().unwrap_or_default().to_string(),
    }
}

impl Inner {
    fn settle(&self, generation: u64) {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            *slot = None;
        }
    }

    async fn exchange(&self, signal: &AbortController) -> RefreshOutcome {
        let refresh = self.tokens.refresh();
        let request = self
            .client
            .post(self.refresh_url.clone())
            .header(CACHE_CONTROL, "no-store")
            .header(AUTHORIZATION, format!("Bearer {}", refresh.expose_secret()))
            .header(ORIGIN, self.app_origin.origin().ascii_serialization())
            .header(REFERER, self.app_origin.as_str());

        debug!("Refreshing session at {}", self.refresh_url);
        let response = signal
            .run(request.send())
            .await
            .map_err(|reason| RefreshError::Aborted { reason })?
            .map_err(|e| {
                error!("Session refresh request failed: {e}");
                RefreshError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .extensions()
                .get::<ReasonPhrase>()
                .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned());
            let body = signal
                .run(response.text())
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default();
            let status_text = status_text(status, reason, body.trim());

            if status == StatusCode::UNAUTHORIZED {
                warn!("Refresh credential rejected; voiding stored credentials");
                let _ = self.tokens.set_access("");
                let _ = self.tokens.set_refresh("");
            }

            error!(
                "Session refresh failed with status {}: {status_text}",
                status.as_u16()
            );
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                status_text,
            });
        }

        let pair: RefreshResponse = signal
            .run(response.json())
            .await
            .map_err(|reason| RefreshError::Aborted { reason })?
            .map_err(|e| {
                error!("Failed to parse session refresh response: {e}");
                RefreshError::InvalidResponse(e.to_string())
            })?;

        let _ = self.tokens.set_access(pair.access);
        let _ = self.tokens.set_refresh(pair.refresh);
        debug!("Session refreshed");
        Ok(())
    }
}
