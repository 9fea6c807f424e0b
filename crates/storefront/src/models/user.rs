//! User profile types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aztec_core::{Email, UserId};

/// A marketplace user profile (domain type).
///
/// Owned by the remote service; the Auth Controller only holds a read-only
/// copy tied to the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID (same as the credential ID).
    pub id: UserId,
    /// User's email address.
    pub email: Email,
    /// Public display name.
    pub username: String,
    /// Contact number or handle.
    pub contact: String,
    /// When the profile was created.
    pub created_at: DateTime<Utc>,
}

/// Profile row created right after a new credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProfile {
    pub id: UserId,
    pub email: Email,
    pub username: String,
    pub contact: String,
}
