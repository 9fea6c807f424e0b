//! Opaque session token.
//!
//! Tokens are lookup keys for the remote session table. They carry enough
//! entropy to be unguessable but are never used as a cryptographic proof by
//! themselves.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base-36 alphabet used for the timestamp suffix.
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// An opaque session token.
///
/// `Debug` output is redacted so tokens do not leak into logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh token: a random v4 UUID followed by the base-36
    /// millisecond timestamp of `now`.
    ///
    /// The suffix keeps tokens unique across clock-identical UUID draws and
    /// makes issue time readable when debugging the session table.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        Self(format!("{}-{}", Uuid::new_v4(), to_base36(millis)))
    }

    /// Wrap an existing token string (e.g. read back from storage).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get the raw token string.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "SessionToken({prefix}…)")
    }
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_owned();
    }
    let mut digits = Vec::new();
    while value > 0 {
        #[allow(clippy::cast_possible_truncation)] // remainder is always < 36
        let digit = (value % 36) as usize;
        digits.push(char::from(BASE36.get(digit).copied().unwrap_or(b'0')));
        value /= 36;
    }
    digits.iter().rev().collect()
}
