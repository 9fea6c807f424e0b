//! Session maintenance commands.
//!
//! # Usage
//!
//! ```bash
//! aztec-cli sweep-sessions
//! ```

use chrono::Utc;

use aztec_storefront::remote::{RemoteError, RemoteService};

/// Delete every session row that expired before now.
///
/// # Errors
///
/// Returns `RemoteError` if the sweep request fails.
pub async fn sweep(remote: &impl RemoteService) -> Result<(), RemoteError> {
    let now = Utc::now();
    tracing::info!(%now, "Sweeping expired sessions...");

    let removed = remote.sweep_expired_sessions(now).await?;

    tracing::info!(removed, "Session sweep complete");
    #[allow(clippy::print_stdout)]
    {
        println!("Removed {removed} expired session(s)");
    }
    Ok(())
}
