//! Install and activate handshake with the hosting runtime.

use log::debug;

use crate::error::Result;
use crate::host::ClientHost;

/// Supersedes any previously installed relay immediately.
///
/// # Errors
///
/// Returns an error if the host rejects the call.
pub async fn on_install(host: &dyn ClientHost) -> Result<()> {
    host.skip_waiting().await?;
    debug!("Installed; skipped waiting for previous contexts");
    Ok(())
}

/// Takes control of every open context.
///
/// Claiming and enumerating run concurrently; activation completes only when
/// both have settled. Returns the number of contexts found.
///
/// # Errors
///
/// Returns the first error reported by either call.
pub async fn on_activate(host: &dyn ClientHost) -> Result<usize> {
    let ((), clients) = tokio::try_join!(host.claim(), host.match_all())?;
    debug!("Activated; controlling {} client(s)", clients.len());
    Ok(clients.len())
}
