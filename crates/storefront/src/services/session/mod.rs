//! Session store.
//!
//! The single authority on whether a valid session exists. It owns the
//! session token, remember flag and hidden timestamp in browser storage and
//! the row in the remote session table.
//!
//! Visibility and unload handlers are hints: they clear local state early,
//! but the authoritative check is always [`SessionStore::validate`] on the
//! next load.

mod error;

pub use error::SessionError;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::DateTime;
use tracing::{debug, info, instrument, warn};

use aztec_core::{SessionToken, UserId};

use crate::clock::Clock;
use crate::config::SessionPolicy;
use crate::models::session::keys;
use crate::models::{DeviceInfo, Session, User};
use crate::remote::{RemoteService, SessionTarget};
use crate::storage::BrowserStorage;

/// Outcome of the page becoming visible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityVerdict {
    /// Keep the session.
    Continue,
    /// Hidden for longer than the idle threshold.
    IdleTimeout,
    /// The session passed its expiry while hidden.
    Expired,
}

/// Local and remote session lifecycle.
pub struct SessionStore {
    remote: Arc<dyn RemoteService>,
    storage: BrowserStorage,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    active: Mutex<Option<Session>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("policy", &self.policy)
            .field("active", &self.active_session().map(|s| s.user_id))
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create a session store.
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteService>,
        storage: BrowserStorage,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            remote,
            storage,
            clock,
            policy,
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<Session>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The session currently in use, if any.
    #[must_use]
    pub fn active_session(&self) -> Option<Session> {
        self.active().clone()
    }

    /// Session timing policy.
    #[must_use]
    pub const fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Token stored in browser storage (tab scope first).
    #[must_use]
    pub fn stored_token(&self) -> Option<SessionToken> {
        self.storage.session_token().map(|(token, _)| token)
    }

    /// Issue a new session for `user_id`.
    ///
    /// The record is persisted remotely before anything is written locally.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Remote` if the session row cannot be created;
    /// local storage is left untouched in that case.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn issue(&self, user_id: &UserId, remember: bool) -> Result<Session, SessionError> {
        let now = self.clock.now();
        let session = Session {
            token: SessionToken::generate(now),
            user_id: user_id.clone(),
            issued_at: now,
            expires_at: now + self.policy.ttl(remember),
            remember,
            device: DeviceInfo::detect(now),
            last_activity_at: now,
        };

        self.remote.create_session_record(&session).await?;

        self.storage.write_session(&session.token, remember);
        self.storage.durable().remove(keys::HIDDEN_AT);
        *self.active() = Some(session.clone());

        info!(expires_at = %session.expires_at, remember, "Session issued");
        Ok(session)
    }

    /// Validate a token against the remote session table.
    ///
    /// Returns the owner's profile for a live session. Unknown and expired
    /// tokens return `None` and clear the local session group; an
    /// unreachable service also returns `None` but leaves local state so the
    /// next load can try again.
    #[instrument(skip(self, token))]
    pub async fn validate(&self, token: &SessionToken) -> Option<User> {
        let grant = match self.remote.validate_session_record(token).await {
            Ok(Some(grant)) => grant,
            Ok(None) => {
                debug!("Unknown session token");
                self.clear_local();
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Could not validate session");
                return None;
            }
        };

        let now = self.clock.now();
        if grant.session.is_expired_at(now) {
            info!(user_id = %grant.user.id, expired_at = %grant.session.expires_at, "Session expired");
            self.delete_remote(&SessionTarget::Token(token.clone())).await;
            self.clear_local();
            return None;
        }

        if let Err(e) = self.remote.touch_session_record(token, now).await {
            warn!(error = %e, "Could not record session activity");
        }

        let mut session = grant.session;
        session.last_activity_at = now;
        *self.active() = Some(session);
        Some(grant.user)
    }

    /// Delete the targeted session row(s) and clear the whole local group.
    ///
    /// Never fails: the remote delete is best-effort and local state is
    /// cleared regardless.
    #[instrument(skip(self, target))]
    pub async fn revoke(&self, target: &SessionTarget) {
        self.delete_remote(target).await;
        self.clear_local();
        debug!("Session revoked");
    }

    /// Delete every expired session row. Failures are logged and count as 0.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> u64 {
        match self.remote.sweep_expired_sessions(self.clock.now()).await {
            Ok(0) => 0,
            Ok(count) => {
                info!(count, "Swept expired sessions");
                count
            }
            Err(e) => {
                warn!(error = %e, "Session sweep failed");
                0
            }
        }
    }

    // =========================================================================
    // Visibility / unload hints
    // =========================================================================

    /// The page became hidden. Non-remembered sessions record when.
    pub fn on_hidden(&self) {
        let Some(session) = self.active_session() else {
            return;
        };
        if session.remember {
            return;
        }
        let stamp = self.clock.now().timestamp_millis().to_string();
        self.storage.durable().set(keys::HIDDEN_AT, &stamp);
    }

    /// The page became visible again.
    ///
    /// The check uses wall-clock deltas only. On `Continue` the hidden
    /// timestamp is cleared and activity recorded; other verdicts leave the
    /// caller to tear the session down.
    pub async fn on_visible(&self) -> VisibilityVerdict {
        let Some(session) = self.active_session() else {
            self.storage.durable().remove(keys::HIDDEN_AT);
            return VisibilityVerdict::Continue;
        };

        let now = self.clock.now();
        if session.is_expired_at(now) {
            return VisibilityVerdict::Expired;
        }

        if !session.remember {
            let hidden_at = self
                .storage
                .durable()
                .get(keys::HIDDEN_AT)
                .and_then(|raw| raw.parse::<i64>().ok())
                .and_then(DateTime::from_timestamp_millis);
            if let Some(hidden_at) = hidden_at {
                let idle = now - hidden_at;
                if idle > self.policy.idle_threshold {
                    info!(idle_secs = idle.num_seconds(), "Idle threshold exceeded");
                    return VisibilityVerdict::IdleTimeout;
                }
            }
        }

        self.storage.durable().remove(keys::HIDDEN_AT);
        if let Err(e) = self.remote.touch_session_record(&session.token, now).await {
            warn!(error = %e, "Could not record session activity");
        }
        if let Some(active) = self.active().as_mut() {
            active.last_activity_at = now;
        }
        VisibilityVerdict::Continue
    }

    /// The page is being closed.
    ///
    /// For a non-remembered session the tab token and caches are cleared
    /// immediately and `true` is returned so the caller can finish the
    /// teardown. Remembered sessions are kept.
    pub fn on_unload(&self) -> bool {
        match self.active_session() {
            Some(session) if !session.remember => {
                self.storage.clear_tab_session_and_caches();
                true
            }
            _ => false,
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Delete the targeted session row(s) remotely, leaving local state
    /// alone. Failures are logged.
    pub async fn delete_remote(&self, target: &SessionTarget) {
        if let Err(e) = self.remote.delete_session_record(target).await {
            warn!(error = %e, "Could not delete remote session");
        }
    }

    /// Drop the local session group and the active session.
    pub fn clear_local(&self) {
        self.storage.clear_session_group();
        *self.active() = None;
    }
}
