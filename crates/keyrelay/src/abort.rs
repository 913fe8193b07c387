//! Per-attempt cancellation with a reason string.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Cancellation token for one request attempt.
///
/// Cloning yields another handle to the same token. The first call to
/// [`abort`](Self::abort) wins; later reasons are discarded.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl AbortController {
    /// Creates a token that has not been aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Aborts the token with `reason`.
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    /// Whether the token has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason the token was aborted with, if it has been.
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Runs `operation` unless the token is aborted first.
    ///
    /// An already-aborted token never polls `operation`. On abort, returns
    /// `Err` carrying the abort reason.
    pub async fn run<F: Future>(&self, operation: F) -> Result<F::Output, String> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(self.reason().unwrap_or("aborted").to_string()),
            output = operation => Ok(output),
        }
    }
}
