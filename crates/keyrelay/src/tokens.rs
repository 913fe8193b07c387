//! The process-wide credential pair.
//!
//! Both values start as the empty string, which means "absent". Every write
//! through [`TokenStore::set_access`] or [`TokenStore::set_refresh`] broadcasts
//! a single-field [`CredentialUpdate`] so the durable-storage owner can persist
//! it. Inbound sync messages write the backing slots directly and never
//! re-broadcast.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::{Origin, Url};

use crate::broadcast::{BroadcastSync, Delivery};

/// Credential update pushed to connected contexts.
///
/// Outbound updates carry exactly one field. An empty string means the
/// credential was voided.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    /// New access credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,

    /// New refresh credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

impl CredentialUpdate {
    /// An update carrying only the access credential.
    pub fn access(value: impl Into<String>) -> Self {
        Self {
            access: Some(value.into()),
            refresh: None,
        }
    }

    /// An update carrying only the refresh credential.
    pub fn refresh(value: impl Into<String>) -> Self {
        Self {
            access: None,
            refresh: Some(value.into()),
        }
    }
}

impl fmt::Debug for CredentialUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| match value.as_deref() {
            None => None,
            Some("") => Some("<voided>"),
            Some(_) => Some("<redacted>"),
        };
        f.debug_struct("CredentialUpdate")
            .field("access", &redact(&self.access))
            .field("refresh", &redact(&self.refresh))
            .finish()
    }
}

/// Credential sync message from another context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Origin of the sender.
    pub origin: String,
    /// Payload with optional `access` and `refresh` fields.
    pub data: Value,
}

impl InboundMessage {
    /// Builds a message from `origin` carrying `update`.
    pub fn new(origin: impl Into<String>, update: &CredentialUpdate) -> Self {
        Self {
            origin: origin.into(),
            data: serde_json::to_value(update).unwrap_or(Value::Null),
        }
    }
}

/// Snapshot of both credentials.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    /// Access credential (empty when absent).
    pub access: SecretString,
    /// Refresh credential (empty when absent).
    pub refresh: SecretString,
}

impl Default for CredentialPair {
    fn default() -> Self {
        Self {
            access: SecretString::from(String::new()),
            refresh: SecretString::from(String::new()),
        }
    }
}

impl CredentialPair {
    fn assign(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Access => &mut self.access,
            Field::Refresh => &mut self.refresh,
        };
        *slot = SecretString::from(value);
    }
}

#[derive(Clone, Copy, Debug)]
enum Field {
    Access,
    Refresh,
}

impl Field {
    const fn name(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Holder of the credential pair.
pub struct TokenStore {
    pair: RwLock<CredentialPair>,
    own_origin: Origin,
    broadcast: BroadcastSync,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("own_origin", &self.own_origin.ascii_serialization())
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Creates an empty store that trusts sync messages from `own_origin`.
    pub fn new(own_origin: &Url, broadcast: BroadcastSync) -> Self {
        Self {
            pair: RwLock::new(CredentialPair::default()),
            own_origin: own_origin.origin(),
            broadcast,
        }
    }

    /// Current access credential; empty when absent.
    pub fn access(&self) -> SecretString {
        self.read(Field::Access)
    }

    /// Current refresh credential; empty when absent.
    pub fn refresh(&self) -> SecretString {
        self.read(Field::Refresh)
    }

    /// Whether an access credential is held.
    pub fn has_access(&self) -> bool {
        !self.access().expose_secret().is_empty()
    }

    /// Whether a refresh credential is held.
    pub fn has_refresh(&self) -> bool {
        !self.refresh().expose_secret().is_empty()
    }

    /// Snapshot of both credentials.
    pub fn snapshot(&self) -> CredentialPair {
        self.pair
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets the access credential and broadcasts `{access}`.
    ///
    /// The new value is readable before the broadcast is queued.
    pub fn set_access(&self, value: impl Into<String>) -> Delivery {
        let value = value.into();
        self.publish(Field::Access, value.clone(), CredentialUpdate::access(value))
    }

    /// Sets the refresh credential and broadcasts `{refresh}`.
    pub fn set_refresh(&self, value: impl Into<String>) -> Delivery {
        let value = value.into();
        self.publish(Field::Refresh, value.clone(), CredentialUpdate::refresh(value))
    }

    /// Applies a sync message from the durable-storage owner.
    ///
    /// Messages from a foreign origin are ignored. Each of `access`/`refresh`
    /// is applied only when it is a non-empty string. Returns whether any
    /// field was applied.
    pub fn on_message(&self, message: &InboundMessage) -> bool {
        let trusted = Url::parse(&message.origin)
            .map(|url| url.origin() == self.own_origin)
            .unwrap_or(false);
        if !trusted {
            warn!(
                "Ignoring credential sync message from foreign origin '{}'",
                message.origin
            );
            return false;
        }

        let mut applied = false;
        for field in [Field::Access, Field::Refresh] {
            match message.data.get(field.name()) {
                Some(Value::String(value)) if !value.is_empty() => {
                    self.write(field, value.clone());
                    applied = true;
                }
                Some(Value::String(_) | Value::Null | Value::Bool(false)) | None => {}
                Some(other) => {
                    debug!(
                        "Ignoring non-string {} credential in sync message ({})",
                        field.name(),
                        json_kind(other)
                    );
                }
            }
        }

        if applied {
            debug!("Applied credential sync message");
        }
        applied
    }

    /// Registers the message listener: applies every message received on
    /// `messages`, in arrival order, until the sender side closes.
    pub fn listen(
        self: &Arc<Self>,
        mut messages: mpsc::UnboundedReceiver<InboundMessage>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                store.on_message(&message);
            }
            debug!("Credential sync listener stopped");
        })
    }

    /// Waits until every broadcast triggered so far has been delivered.
    pub async fn flush(&self) {
        self.broadcast.flush().await;
    }

    fn read(&self, field: Field) -> SecretString {
        let pair = self.pair.read().unwrap_or_else(PoisonError::into_inner);
        match field {
            Field::Access => pair.access.clone(),
            Field::Refresh => pair.refresh.clone(),
        }
    }

    fn write(&self, field: Field, value: String) {
        let mut pair = self.pair.write().unwrap_or_else(PoisonError::into_inner);
        pair.assign(field, value);
    }

    /// Writes the slot and queues its broadcast under one guard, so queued
    /// broadcasts follow slot write order.
    fn publish(&self, field: Field, value: String, update: CredentialUpdate) -> Delivery {
        let mut pair = self.pair.write().unwrap_or_else(PoisonError::into_inner);
        pair.assign(field, value);
        self.broadcast.send(update)
    }
}
