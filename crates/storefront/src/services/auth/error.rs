//! Authentication error types.

use thiserror::Error;

use crate::remote::RemoteError;
use crate::services::session::SessionError;

/// Errors that can occur during authentication operations.
///
/// A failed sign-in or sign-up never changes the authentication state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] aztec_core::EmailError),

    /// Password too weak or invalid.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// Wrong password or unknown account.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// An account already exists for the email.
    #[error("user already exists")]
    UserAlreadyExists,

    /// A user is already signed in.
    #[error("already signed in")]
    AlreadyAuthenticated,

    /// The credential is valid but its profile row is missing or could not
    /// be created. The credential has been signed back out.
    #[error("profile inconsistency: {0}")]
    ProfileInconsistency(String),

    /// The session could not be issued.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The remote service failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}
