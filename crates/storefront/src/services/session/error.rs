//! Session store error types.

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors from operations that must reach the remote session table.
///
/// Validation and revocation never fail: an unreachable service means "not
/// authenticated" and revocation is best-effort.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The session record could not be persisted.
    #[error("could not record session: {0}")]
    Remote(#[from] RemoteError),
}
