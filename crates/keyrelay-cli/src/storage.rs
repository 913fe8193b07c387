//! Durable credential storage owned by the host application.
//!
//! Credentials are kept in a JSON object under configurable keys. Each
//! broadcast from the relay is applied on arrival, one at a time, so rapid
//! successive writes land in send order.

use std::collections::BTreeMap;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use keyrelay::{ClientConnection, CredentialUpdate, InboundMessage};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::config::StorageSettings;
use crate::error::{CliError, Result};

/// JSON credential file.
#[derive(Debug, Clone)]
pub struct CredentialFile {
    path: PathBuf,
    access_key: String,
    refresh_key: String,
}

impl CredentialFile {
    /// Creates a handle for the file at `path` using the configured keys.
    pub fn new(path: PathBuf, settings: &StorageSettings) -> Self {
        Self {
            path,
            access_key: settings.access_key.clone(),
            refresh_key: settings.refresh_key.clone(),
        }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored pair. A missing file reads as no credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn read(&self) -> Result<CredentialUpdate> {
        let entries = self.entries()?;
        Ok(CredentialUpdate {
            access: entries.get(&self.access_key).cloned(),
            refresh: entries.get(&self.refresh_key).cloned(),
        })
    }

    /// The bootstrap message pushing the stored pair into the relay.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn bootstrap_message(&self, origin: &str) -> Result<InboundMessage> {
        Ok(InboundMessage::new(origin, &self.read()?))
    }

    /// Applies one broadcast: present fields are written, empty ones removed.
    ///
    /// Uses atomic write (write to temp file, then rename).
    ///
    /// # Errors
    ///
    /// Returns an error if reading, serializing or writing the file fails.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn apply(&self, update: &CredentialUpdate) -> Result<()> {
        let mut entries = self.entries()?;
        for (key, value) in [
            (&self.access_key, &update.access),
            (&self.refresh_key, &update.refresh),
        ] {
            match value.as_deref() {
                None => {}
                Some("") => {
                    entries.remove(key);
                }
                Some(value) => {
                    entries.insert(key.clone(), value.to_string());
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&entries)?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        #[cfg(unix)]
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))?;
        fs::rename(&temp_path, &self.path)?;

        debug!(keys = entries.len(), "Persisted credential update");
        Ok(())
    }

    fn entries(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| {
            CliError::Storage(format!(
                "Failed to parse credential file {}: {e}",
                self.path.display()
            ))
        })
    }
}

/// A running storage owner consuming relay broadcasts.
pub struct StorageOwner {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<usize>>,
}

impl StorageOwner {
    /// Starts applying every update received on `connection` to `file`.
    pub fn spawn(file: CredentialFile, mut connection: ClientConnection) -> Self {
        let (shutdown, mut stop) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut applied = 0;
            loop {
                tokio::select! {
                    update = connection.updates.recv() => match update {
                        Some(update) => {
                            apply_blocking(&file, update).await?;
                            applied += 1;
                        }
                        None => break,
                    },
                    _ = &mut stop => {
                        while let Ok(update) = connection.updates.try_recv() {
                            apply_blocking(&file, update).await?;
                            applied += 1;
                        }
                        break;
                    }
                }
            }
            Ok::<_, CliError>(applied)
        });
        Self { shutdown, task }
    }

    /// Applies every update already delivered, then stops.
    ///
    /// Returns the number of updates applied over the owner's lifetime.
    ///
    /// # Errors
    ///
    /// Returns the first storage error, or an error if the task panicked.
    pub async fn finish(self) -> Result<usize> {
        let _ = self.shutdown.send(());
        let applied = self
            .task
            .await
            .map_err(|e| CliError::Storage(format!("Task join error: {e}")))??;
        info!(applied, "Storage owner stopped");
        Ok(applied)
    }
}

/// Runs [`CredentialFile::apply`] on the blocking pool.
async fn apply_blocking(file: &CredentialFile, update: CredentialUpdate) -> Result<()> {
    let file = file.clone();
    tokio::task::spawn_blocking(move || file.apply(&update))
        .await
        .map_err(|e| CliError::Storage(format!("Task join error: {e}")))?
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use keyrelay::{ClientHost, LocalClients};

    use super::*;

    fn file_in(dir: &tempfile::TempDir) -> CredentialFile {
        CredentialFile::new(dir.path().join("credentials.json"), &StorageSettings::default())
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        assert_eq!(file.read().unwrap(), CredentialUpdate::default());
    }

    #[test]
    fn test_apply_writes_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);

        file.apply(&CredentialUpdate::access("abc")).unwrap();
        file.apply(&CredentialUpdate::refresh("def")).unwrap();
        let stored = file.read().unwrap();
        assert_eq!(stored.access.as_deref(), Some("abc"));
        assert_eq!(stored.refresh.as_deref(), Some("def"));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({ "access_token": "abc", "refresh_token": "def" })
        );

        file.apply(&CredentialUpdate::access("")).unwrap();
        let stored = file.read().unwrap();
        assert_eq!(stored.access, None);
        assert_eq!(stored.refresh.as_deref(), Some("def"));
    }

    #[test]
    fn test_bootstrap_message() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        file.apply(&CredentialUpdate::refresh("def")).unwrap();

        let message = file.bootstrap_message("https://app.example.com").unwrap();
        assert_eq!(message.origin, "https://app.example.com");
        assert_eq!(message.data, serde_json::json!({ "refresh": "def" }));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        fs::write(file.path(), "not json").unwrap();
        assert!(matches!(file.read(), Err(CliError::Storage(_))));
    }

    #[tokio::test]
    async fn test_owner_applies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        let host = LocalClients::new();
        let owner = StorageOwner::spawn(file.clone(), host.connect());

        let client = host.match_all().await.unwrap().remove(0);
        for value in ["one", "two", "three"] {
            client.post_message(&CredentialUpdate::access(value)).unwrap();
        }

        assert_eq!(owner.finish().await.unwrap(), 3);
        assert_eq!(file.read().unwrap().access.as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn test_owner_reports_storage_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let file = CredentialFile::new(blocker.join("credentials.json"), &StorageSettings::default());
        let host = LocalClients::new();
        let owner = StorageOwner::spawn(file, host.connect());

        let client = host.match_all().await.unwrap().remove(0);
        client.post_message(&CredentialUpdate::access("abc")).unwrap();

        assert!(owner.finish().await.is_err());
    }
}
