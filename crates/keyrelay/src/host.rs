//! The hosting runtime seam: connected execution contexts and lifecycle calls.
//!
//! [`ClientHost`] is what the relay needs from whatever runtime embeds it.
//! [`LocalClients`] is an in-process implementation where every context is an
//! unbounded channel, so delivery to one context preserves send order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::tokens::CredentialUpdate;

/// One connected execution context that can receive credential updates.
pub trait Client: Send + Sync {
    /// Stable identifier of the context.
    fn id(&self) -> Uuid;

    /// Posts an update to the context.
    ///
    /// # Errors
    ///
    /// Returns an error if the context is gone.
    fn post_message(&self, update: &CredentialUpdate) -> Result<()>;
}

/// The runtime hosting the relay.
#[async_trait]
pub trait ClientHost: Send + Sync {
    /// Enumerates the currently connected contexts.
    async fn match_all(&self) -> Result<Vec<Arc<dyn Client>>>;

    /// Takes control of every already-open context.
    async fn claim(&self) -> Result<()>;

    /// Supersedes any previously installed relay without waiting for its contexts to close.
    async fn skip_waiting(&self) -> Result<()>;
}

struct LocalClient {
    id: Uuid,
    sender: mpsc::UnboundedSender<CredentialUpdate>,
}

impl Client for LocalClient {
    fn id(&self) -> Uuid {
        self.id
    }

    fn post_message(&self, update: &CredentialUpdate) -> Result<()> {
        self.sender
            .send(update.clone())
            .map_err(|_| RelayError::Host(format!("client {} disconnected", self.id)))
    }
}

/// Receiving end of a context connected to [`LocalClients`].
///
/// Dropping `updates` disconnects the context.
#[derive(Debug)]
pub struct ClientConnection {
    /// Identifier of the connected context.
    pub id: Uuid,
    /// Credential updates broadcast by the relay, in send order.
    pub updates: mpsc::UnboundedReceiver<CredentialUpdate>,
}

/// In-process [`ClientHost`].
#[derive(Clone, Default)]
pub struct LocalClients {
    clients: Arc<Mutex<Vec<Arc<LocalClient>>>>,
    claimed: Arc<AtomicBool>,
    skipped_waiting: Arc<AtomicBool>,
}

impl LocalClients {
    /// Creates a host with no connected contexts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a new context.
    pub fn connect(&self) -> ClientConnection {
        let (sender, updates) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(LocalClient { id, sender }));
        ClientConnection { id, updates }
    }

    /// Number of contexts that are still connected.
    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|client| !client.sender.is_closed())
            .count()
    }

    /// Whether no context is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`ClientHost::claim`] has been called.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    /// Whether [`ClientHost::skip_waiting`] has been called.
    pub fn has_skipped_waiting(&self) -> bool {
        self.skipped_waiting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientHost for LocalClients {
    async fn match_all(&self) -> Result<Vec<Arc<dyn Client>>> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|e| RelayError::Host(format!("client registry poisoned: {e}")))?;
        clients.retain(|client| !client.sender.is_closed());
        Ok(clients
            .iter()
            .map(|client| Arc::clone(client) as Arc<dyn Client>)
            .collect())
    }

    async fn claim(&self) -> Result<()> {
        self.claimed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn skip_waiting(&self) -> Result<()> {
        self.skipped_waiting.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_match_all_prunes_disconnected() {
        let host = LocalClients::new();
        let kept = host.connect();
        let dropped = host.connect();
        drop(dropped);

        let clients = host.match_all().await.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].id(), kept.id);
        assert_eq!(host.len(), 1);
    }

    #[tokio::test]
    async fn test_post_message_preserves_order() {
        let host = LocalClients::new();
        let mut connection = host.connect();
        let client = host.match_all().await.unwrap().remove(0);

        client.post_message(&CredentialUpdate::access("one")).unwrap();
        client.post_message(&CredentialUpdate::access("two")).unwrap();

        assert_eq!(
            connection.updates.recv().await.unwrap().access.as_deref(),
            Some("one")
        );
        assert_eq!(
            connection.updates.recv().await.unwrap().access.as_deref(),
            Some("two")
        );
    }

    #[tokio::test]
    async fn test_lifecycle_flags() {
        let host = LocalClients::new();
        assert!(!host.is_claimed());
        assert!(!host.has_skipped_waiting());

        host.claim().await.unwrap();
        host.skip_waiting().await.unwrap();

        assert!(host.is_claimed());
        assert!(host.has_skipped_waiting());
    }
}
