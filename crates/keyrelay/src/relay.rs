//! Wires the store, broadcast, refresh and interception together.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use reqwest_middleware::ClientWithMiddleware;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broadcast::BroadcastSync;
use crate::config::{RelayConfig, ResolvedConfig};
use crate::error::Result;
use crate::host::ClientHost;
use crate::interceptor::RequestInterceptor;
use crate::lifecycle;
use crate::origin::Scope;
use crate::refresh::RefreshCoordinator;
use crate::tokens::{InboundMessage, TokenStore};

/// A configured relay bound to a hosting runtime.
///
/// Construct within a Tokio runtime: the broadcast worker and the sync
/// listener are spawned on it.
pub struct Relay {
    config: ResolvedConfig,
    host: Arc<dyn ClientHost>,
    tokens: Arc<TokenStore>,
    refresher: RefreshCoordinator,
    interceptor: RequestInterceptor,
    messages: mpsc::UnboundedSender<InboundMessage>,
    listener: JoinHandle<()>,
}

impl Relay {
    /// Builds a relay from `config`, delivering credential updates through `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the refresh
    /// client cannot be built.
    pub fn new(config: &RelayConfig, host: Arc<dyn ClientHost>) -> Result<Self> {
        config.validate()?;
        let resolved = config.resolve()?;

        let refresh_client = match config.timeout_seconds {
            Some(timeout) => reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout))
                .build()?,
            None => reqwest::Client::builder().build()?,
        };

        let broadcast = BroadcastSync::spawn(Arc::clone(&host));
        let tokens = Arc::new(TokenStore::new(&resolved.app_origin, broadcast));
        let refresher = RefreshCoordinator::new(refresh_client, &resolved, Arc::clone(&tokens));
        let interceptor = RequestInterceptor::new(
            Scope::new(&resolved.api_origin, resolved.login_path.clone()),
            resolved.app_origin.clone(),
            Arc::clone(&tokens),
            refresher.clone(),
        );

        let (messages, inbound) = mpsc::unbounded_channel();
        let listener = tokens.listen(inbound);

        debug!(
            "Relay configured for API origin {}",
            resolved.api_origin.origin().ascii_serialization()
        );

        Ok(Self {
            config: resolved,
            host,
            tokens,
            refresher,
            interceptor,
            messages,
            listener,
        })
    }

    /// The resolved origins and endpoints.
    pub const fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// The credential store.
    pub const fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// The refresh coordinator.
    pub const fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// The interception middleware, for installing into a custom client stack.
    pub fn interceptor(&self) -> RequestInterceptor {
        self.interceptor.clone()
    }

    /// A client with the interceptor installed over a default `reqwest::Client`.
    pub fn client(&self) -> ClientWithMiddleware {
        self.client_with(reqwest::Client::new())
    }

    /// A client with the interceptor installed over `client`.
    pub fn client_with(&self, client: reqwest::Client) -> ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(client)
            .with(self.interceptor())
            .build()
    }

    /// Sender for credential sync messages; messages are applied in order.
    pub fn messages(&self) -> mpsc::UnboundedSender<InboundMessage> {
        self.messages.clone()
    }

    /// Runs the install step of the lifecycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the host rejects the call.
    pub async fn install(&self) -> Result<()> {
        lifecycle::on_install(self.host.as_ref()).await
    }

    /// Runs the activate step of the lifecycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the host fails to claim or enumerate contexts.
    pub async fn activate(&self) -> Result<usize> {
        let clients = lifecycle::on_activate(self.host.as_ref()).await?;
        self.tokens.flush().await;
        Ok(clients)
    }

    /// Waits until every credential broadcast issued so far has been delivered.
    pub async fn flush(&self) {
        self.tokens.flush().await;
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
