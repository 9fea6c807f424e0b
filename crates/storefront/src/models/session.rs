//! Session-related types.
//!
//! A [`Session`] is the record shared between the local browser context and
//! the remote session table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aztec_core::{SessionToken, UserId};

/// An issued login session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque lookup token.
    pub token: SessionToken,
    /// Owner of the session.
    pub user_id: UserId,
    /// When the session was issued.
    pub issued_at: DateTime<Utc>,
    /// When the session stops being valid.
    pub expires_at: DateTime<Utc>,
    /// Whether the user asked to be remembered across restarts.
    pub remember: bool,
    /// Device the session was issued on.
    pub device: DeviceInfo,
    /// Last time the session was seen in use.
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Descriptor of the device a session was issued on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// User agent string.
    pub agent: String,
    /// Operating system / platform.
    pub platform: String,
    /// Preferred locale.
    pub locale: String,
    /// When the descriptor was captured.
    pub captured_at: DateTime<Utc>,
}

impl DeviceInfo {
    /// Describe the current process environment.
    ///
    /// Embedders running inside a browser shell should build their own
    /// descriptor from the navigator instead.
    #[must_use]
    pub fn detect(now: DateTime<Utc>) -> Self {
        let locale = std::env::var("LANG")
            .ok()
            .and_then(|lang| lang.split('.').next().map(|l| l.replace('_', "-")))
            .filter(|l| !l.is_empty() && l != "C")
            .unwrap_or_else(|| "en-IN".to_owned());

        Self {
            agent: format!("aztec-storefront/{}", env!("CARGO_PKG_VERSION")),
            platform: std::env::consts::OS.to_owned(),
            locale,
            captured_at: now,
        }
    }
}

/// Local storage keys for session and cache data.
///
/// These names are a contract with the presentation layer: it may read
/// them but must never write them.
pub mod keys {
    /// Key for the session token (durable or tab scope).
    pub const SESSION_TOKEN: &str = "aztec-session-token";

    /// Key for the remember-me flag (`"true"` / `"false"`).
    pub const REMEMBER_ME: &str = "aztec-remember-me";

    /// Key for the millisecond timestamp at which the tab was hidden.
    pub const HIDDEN_AT: &str = "aztec-hidden-timestamp";

    /// Key for the cart snapshot.
    pub const CART: &str = "aztec-cart";

    /// Key for the listings mirror.
    pub const LISTINGS: &str = "aztec-selling";

    /// Every key in the session group, cleared together on teardown.
    pub const ALL: &[&str] = &[SESSION_TOKEN, REMEMBER_ME, HIDDEN_AT, CART, LISTINGS];
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let session = Session {
            token: SessionToken::from_raw("t"),
            user_id: UserId::new("u1"),
            issued_at: now - TimeDelta::hours(24),
            expires_at: now,
            remember: false,
            device: DeviceInfo::detect(now),
            last_activity_at: now,
        };
        assert!(session.is_expired_at(now));
        assert!(!session.is_expired_at(now - TimeDelta::seconds(1)));
    }

    #[test]
    fn test_detect_fills_every_field() {
        let now = Utc::now();
        let device = DeviceInfo::detect(now);
        assert!(device.agent.starts_with("aztec-storefront/"));
        assert!(!device.platform.is_empty());
        assert!(!device.locale.is_empty());
        assert_eq!(device.captured_at, now);
    }
}
