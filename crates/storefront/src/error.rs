//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type for the presentation layer. Server
//! faults are captured to Sentry via [`AppError::report`]; user mistakes
//! are only turned into a message.

use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::RemoteError;
use crate::services::auth::AuthError;
use crate::services::ledger::LedgerError;
use crate::services::session::SessionError;
use crate::services::sync::SyncFailure;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Ledger operation failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Session record operation failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Remote service call failed.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A background write could not be reconciled.
    #[error("Sync error: {0}")]
    Sync(#[from] SyncFailure),

    /// Configuration is invalid.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl AppError {
    /// Whether the failure is ours rather than the user's.
    #[must_use]
    pub const fn is_server_fault(&self) -> bool {
        match self {
            Self::Auth(err) => matches!(
                err,
                AuthError::ProfileInconsistency(_) | AuthError::Session(_) | AuthError::Remote(_)
            ),
            Self::Ledger(err) => matches!(err, LedgerError::Remote(_)),
            Self::Session(_) | Self::Remote(_) | Self::Sync(_) | Self::Config(_) => true,
        }
    }

    /// Message safe to show to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        // Don't expose internal error details to users
        match self {
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials => "Invalid email or password".to_string(),
                AuthError::UserAlreadyExists => {
                    "An account with this email already exists".to_string()
                }
                AuthError::WeakPassword(msg) => msg.clone(),
                AuthError::InvalidEmail(_) => "Invalid email address".to_string(),
                AuthError::AlreadyAuthenticated => "You are already signed in".to_string(),
                AuthError::ProfileInconsistency(_) => {
                    "Your account could not be set up. Please try again".to_string()
                }
                AuthError::Session(_) | AuthError::Remote(_) => {
                    "Service unavailable, please try again".to_string()
                }
            },
            Self::Ledger(LedgerError::Remote(_)) => {
                "Could not reach the store, please try again".to_string()
            }
            Self::Ledger(err) => err.to_string(),
            Self::Sync(_) => "Some changes could not be saved yet".to_string(),
            Self::Session(_) | Self::Remote(_) => {
                "Service unavailable, please try again".to_string()
            }
            Self::Config(_) => "Internal error".to_string(),
        }
    }

    /// Capture server faults to Sentry. Returns whether an event was sent.
    pub fn report(&self) -> bool {
        if !self.is_server_fault() {
            return false;
        }
        let event_id = sentry::capture_error(self);
        tracing::error!(
            error = %self,
            sentry_event_id = %event_id,
            "Storefront error"
        );
        true
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on sign-out to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("ledger", "list_for_sale", Some(&[("product_id", "seed-basil")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
