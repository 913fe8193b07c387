//! # keyrelay
//!
//! Middleware that attaches short-lived bearer credentials to requests for a
//! protected API and recovers from credential expiry without the caller
//! observing a failure.
//!
//! - **Attachment**: in-scope requests carry `Authorization: Bearer <access>`
//! - **Single-flight refresh**: one refresh exchange at a time, shared by every
//!   request that finds the access credential missing or rejected
//! - **Replay**: a request answered with 401 is retried once after the refresh
//! - **Sync**: every credential write is broadcast to connected contexts so a
//!   durable-storage owner can persist it; inbound sync from the own origin
//!   seeds the store
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use keyrelay::{CredentialUpdate, InboundMessage, LocalClients, Relay, RelayConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let host = LocalClients::new();
//! let mut storage_owner = host.connect();
//!
//! let relay = Relay::new(&RelayConfig::new("https://app.example.com"), Arc::new(host))?;
//! relay.install().await?;
//! relay.activate().await?;
//!
//! // Seed the store with the durable credential pair.
//! relay.messages().send(InboundMessage::new(
//!     "https://app.example.com",
//!     &CredentialUpdate::refresh("stored-refresh-token"),
//! ))?;
//!
//! let response = relay
//!     .client()
//!     .get("https://api.example.com/profile")
//!     .send()
//!     .await?;
//! println!("{}", response.status());
//!
//! // Persist whatever the refresh produced.
//! relay.flush().await;
//! while let Ok(update) = storage_owner.updates.try_recv() {
//!     println!("persist {update:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod abort;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod host;
pub mod interceptor;
pub mod lifecycle;
pub mod origin;
pub mod refresh;
pub mod relay;
pub mod tokens;

pub use abort::AbortController;
pub use broadcast::{BroadcastSync, Delivery};
pub use config::{RelayConfig, ResolvedConfig};
pub use error::{REFRESH_TOKEN_MISSING, RefreshError, RelayError, Result};
pub use host::{Client, ClientConnection, ClientHost, LocalClients};
pub use interceptor::RequestInterceptor;
pub use origin::{Scope, derive_api_origin, parse_origin};
pub use refresh::RefreshCoordinator;
pub use relay::Relay;
pub use tokens::{CredentialPair, CredentialUpdate, InboundMessage, TokenStore};
