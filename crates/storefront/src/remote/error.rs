//! Remote service error types.

use thiserror::Error;

/// Errors returned by a [`RemoteService`](super::RemoteService).
///
/// Transport-level failures are converted into this taxonomy at the
/// boundary so callers never see raw HTTP or I/O errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A unique row already exists (e.g. duplicate account).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service refused the request for a reason it described.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The service could not be reached or answered with a server error.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
