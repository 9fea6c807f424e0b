//! Authentication controller.
//!
//! Owns the single source of truth for "is a user signed in" and exposes it
//! as an [`AuthSnapshot`] watch channel. Built on the [`SessionStore`] and
//! the remote service:
//!
//! ```text
//! Unauthenticated --sign_in/sign_up--> Authenticated
//! Authenticated --sign_out | expiry | idle timeout | unload--> Unauthenticated
//! ```
//!
//! Every transition out of `Authenticated` runs the same teardown.

mod error;

pub use error::AuthError;

use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use aztec_core::{Email, UserId};

use crate::error::{clear_sentry_user, set_sentry_user};
use crate::events::{SessionEvents, TerminationReason};
use crate::models::{NewProfile, User};
use crate::remote::{RemoteError, RemoteService, SessionTarget};
use crate::services::session::{SessionStore, VisibilityVerdict};

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 6;

/// Authentication state published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub current_user: Option<User>,
    /// True until the startup sequence has finished.
    pub is_loading: bool,
}

/// Page visibility, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Visible,
}

/// Authentication controller.
pub struct AuthController {
    remote: Arc<dyn RemoteService>,
    sessions: Arc<SessionStore>,
    events: SessionEvents,
    state: watch::Sender<AuthSnapshot>,
    /// Serializes state transitions.
    transition: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for AuthController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthController")
            .field("state", &*self.state.borrow())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl AuthController {
    /// Create a controller in the loading state.
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteService>, sessions: Arc<SessionStore>) -> Self {
        let (state, _) = watch::channel(AuthSnapshot {
            current_user: None,
            is_loading: true,
        });
        Self {
            remote,
            sessions,
            events: SessionEvents::default(),
            state,
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Session lifecycle events.
    #[must_use]
    pub const fn events(&self) -> &SessionEvents {
        &self.events
    }

    /// The session store this controller drives.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Watch authentication state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    /// Current authentication state.
    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    /// The signed-in user, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().current_user.clone()
    }

    /// Whether the startup sequence is still running.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    /// Whether a user is signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().current_user.is_some()
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Restore the session stored in the browser, if any.
    ///
    /// Validation runs under the startup timeout; when it elapses loading
    /// finishes unauthenticated. `is_loading` is `false` afterwards in every
    /// case. Expired sessions are swept in the background.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Option<User> {
        let _transition = self.transition.lock().await;
        self.state.send_modify(|s| s.is_loading = true);

        let user = match self.sessions.stored_token() {
            None => None,
            Some(token) => {
                let limit = self.sessions.policy().startup_timeout;
                if let Ok(user) = tokio::time::timeout(limit, self.sessions.validate(&token)).await
                {
                    user
                } else {
                    warn!(timeout_ms = limit.as_millis(), "Session validation timed out");
                    None
                }
            }
        };

        match user {
            Some(user) => {
                let remember = self
                    .sessions
                    .active_session()
                    .is_some_and(|s| s.remember);
                self.establish(&user, remember).await;
            }
            None => {
                self.state.send_replace(AuthSnapshot {
                    current_user: None,
                    is_loading: false,
                });
            }
        }

        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            sessions.sweep_expired().await;
        });
        self.current_user()
    }

    // =========================================================================
    // Sign up / sign in / sign out
    // =========================================================================

    /// Create an account and its profile, then sign in.
    ///
    /// If the profile cannot be created the new credential is deleted and
    /// signed out again, so no profileless account stays signed in.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::AlreadyAuthenticated` if a user is signed in,
    /// `InvalidEmail` or `WeakPassword` for bad input,
    /// `UserAlreadyExists` for a taken email, `ProfileInconsistency` when
    /// the profile row fails, `Session` if no session could be issued.
    #[instrument(skip(self, password, contact))]
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
        contact: &str,
        remember: bool,
    ) -> Result<User, AuthError> {
        let _transition = self.transition.lock().await;
        if self.is_authenticated() {
            return Err(AuthError::AlreadyAuthenticated);
        }

        let email = Email::parse(email)?;
        validate_password(password)?;
        let secret = SecretString::from(password.to_owned());

        let grant = self
            .remote
            .create_account(&email, &secret)
            .await
            .map_err(|e| match e {
                RemoteError::Conflict(_) => AuthError::UserAlreadyExists,
                other => AuthError::Remote(other),
            })?;

        let profile = NewProfile {
            id: grant.user_id.clone(),
            email,
            username: username.trim().to_owned(),
            contact: contact.trim().to_owned(),
        };
        let user = match self.remote.create_profile(&profile).await {
            Ok(user) => user,
            Err(e) => {
                error!(user_id = %grant.user_id, error = %e, "Profile creation failed, rolling back account");
                self.rollback_account(&grant.user_id).await;
                return Err(AuthError::ProfileInconsistency(e.to_string()));
            }
        };

        let session = match self.sessions.issue(&user.id, remember).await {
            Ok(session) => session,
            Err(e) => {
                self.revoke_credential(&user.id).await;
                return Err(e.into());
            }
        };

        info!(user_id = %user.id, "User signed up");
        self.establish(&user, session.remember).await;
        Ok(user)
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::AlreadyAuthenticated` if a user is signed in,
    /// `InvalidCredentials` for a wrong email/password, and
    /// `ProfileInconsistency` when the account has no profile (the
    /// credential is signed back out).
    #[instrument(skip(self, password))]
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<User, AuthError> {
        let _transition = self.transition.lock().await;
        if self.is_authenticated() {
            return Err(AuthError::AlreadyAuthenticated);
        }

        let email = Email::parse(email)?;
        let secret = SecretString::from(password.to_owned());

        let grant = self
            .remote
            .authenticate(&email, &secret)
            .await
            .map_err(|e| match e {
                RemoteError::Unauthorized(_) => AuthError::InvalidCredentials,
                other => AuthError::Remote(other),
            })?;

        let user = match self.remote.get_profile(&grant.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                error!(user_id = %grant.user_id, "Account has no profile");
                self.revoke_credential(&grant.user_id).await;
                return Err(AuthError::ProfileInconsistency(
                    "no profile for this account".to_owned(),
                ));
            }
            Err(e) => {
                self.revoke_credential(&grant.user_id).await;
                return Err(AuthError::Remote(e));
            }
        };

        let session = match self.sessions.issue(&user.id, remember).await {
            Ok(session) => session,
            Err(e) => {
                self.revoke_credential(&user.id).await;
                return Err(e.into());
            }
        };

        info!(user_id = %user.id, remember, "User signed in");
        self.establish(&user, session.remember).await;
        Ok(user)
    }

    /// Sign out and clear every session and cache key.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) {
        let _transition = self.transition.lock().await;
        self.teardown(TerminationReason::SignOut).await;
    }

    // =========================================================================
    // Page lifecycle hints
    // =========================================================================

    /// The page was hidden or shown again.
    ///
    /// Ends the session when it was hidden past the idle threshold (for
    /// non-remembered sessions) or expired meanwhile.
    pub async fn on_visibility_change(&self, visibility: Visibility) {
        let _transition = self.transition.lock().await;
        match visibility {
            Visibility::Hidden => self.sessions.on_hidden(),
            Visibility::Visible => match self.sessions.on_visible().await {
                VisibilityVerdict::Continue => {}
                VisibilityVerdict::IdleTimeout => {
                    self.teardown(TerminationReason::IdleTimeout).await;
                }
                VisibilityVerdict::Expired => self.teardown(TerminationReason::Expired).await,
            },
        }
    }

    /// The page is being closed.
    ///
    /// Non-remembered sessions lose their local token and caches before the
    /// first suspension point; the remote cleanup that follows may not get
    /// to run.
    pub async fn on_page_unload(&self) {
        if self.sessions.on_unload() {
            let _transition = self.transition.lock().await;
            self.teardown(TerminationReason::PageUnload).await;
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn establish(&self, user: &User, remember: bool) {
        set_sentry_user(&user.id, Some(user.email.as_str()));
        self.state.send_replace(AuthSnapshot {
            current_user: Some(user.clone()),
            is_loading: false,
        });
        self.events.established(&user.id, remember).await;
    }

    /// The one routine every session-ending path goes through. Callers hold
    /// the transition lock.
    ///
    /// Local state is cleared and observers are notified before any remote
    /// call. The remote cleanup runs in its own task; teardown waits for it
    /// at most `cleanup_wait` and leaves it running past that.
    async fn teardown(&self, reason: TerminationReason) {
        let user_id = self.current_user().map(|u| u.id);
        let target = self
            .sessions
            .active_session()
            .map(|s| SessionTarget::Token(s.token))
            .or_else(|| self.sessions.stored_token().map(SessionTarget::Token))
            .or_else(|| user_id.clone().map(SessionTarget::User));

        self.sessions.clear_local();
        clear_sentry_user();
        self.state.send_replace(AuthSnapshot {
            current_user: None,
            is_loading: false,
        });
        self.events.terminated(reason);
        info!(%reason, user_id = ?user_id.as_ref().map(UserId::as_str), "Session ended");

        if target.is_none() && user_id.is_none() {
            return;
        }
        let sessions = Arc::clone(&self.sessions);
        let remote = Arc::clone(&self.remote);
        let cleanup = tokio::spawn(async move {
            if let Some(target) = &target {
                sessions.delete_remote(target).await;
            }
            if let Some(user_id) = &user_id {
                revoke_credential(remote.as_ref(), user_id).await;
            }
        });

        let wait = self.sessions.policy().cleanup_wait;
        if tokio::time::timeout(wait, cleanup).await.is_err() {
            warn!(wait_ms = wait.as_millis(), "Remote session cleanup still running");
        }
    }

    async fn rollback_account(&self, user_id: &UserId) {
        if let Err(e) = self.remote.delete_account(user_id).await {
            error!(%user_id, error = %e, "Could not delete account during rollback");
        }
        self.revoke_credential(user_id).await;
    }

    async fn revoke_credential(&self, user_id: &UserId) {
        revoke_credential(self.remote.as_ref(), user_id).await;
    }
}

async fn revoke_credential(remote: &dyn RemoteService, user_id: &UserId) {
    if let Err(e) = remote.revoke_credential(user_id).await {
        warn!(%user_id, error = %e, "Could not revoke credential");
    }
}

/// Validate password requirements.
fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SessionPolicy;
    use crate::events::SessionObserver;
    use crate::models::session::keys;
    use crate::remote::MemoryRemote;
    use crate::remote::memory::RemoteOp;
    use crate::storage::BrowserStorage;

    #[derive(Default)]
    struct Recorder {
        ended: Mutex<Vec<TerminationReason>>,
        started: Mutex<Vec<(UserId, bool)>>,
    }

    #[async_trait]
    impl SessionObserver for Recorder {
        async fn session_established(&self, user_id: &UserId, remember: bool) {
            self.started.lock().unwrap().push((user_id.clone(), remember));
        }

        fn session_terminated(&self, reason: TerminationReason) {
            self.ended.lock().unwrap().push(reason);
        }
    }

    struct Fixture {
        auth: AuthController,
        remote: MemoryRemote,
        storage: BrowserStorage,
        clock: ManualClock,
        recorder: Arc<Recorder>,
    }

    fn fixture_with(policy: SessionPolicy) -> Fixture {
        let remote = MemoryRemote::new();
        let storage = BrowserStorage::in_memory();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        let sessions = Arc::new(SessionStore::new(
            Arc::new(remote.clone()),
            storage.clone(),
            Arc::new(clock.clone()),
            policy,
        ));
        let auth = AuthController::new(Arc::new(remote.clone()), sessions);
        let recorder = Arc::new(Recorder::default());
        auth.events().subscribe(recorder.clone());
        Fixture {
            auth,
            remote,
            storage,
            clock,
            recorder,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SessionPolicy::default())
    }

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile_and_session() {
        let f = fixture();
        let user = f
            .auth
            .sign_up("Asha@Aztec.farm", "secret1", "asha", "+91 98200 00000", false)
            .await
            .unwrap();

        assert_eq!(user.email.as_str(), "asha@aztec.farm");
        assert!(f.remote.has_profile(&user.id));
        assert_eq!(f.remote.session_count(), 1);
        assert_eq!(f.auth.current_user(), Some(user.clone()));
        assert!(!f.auth.is_loading());
        assert_eq!(*f.recorder.started.lock().unwrap(), [(user.id, false)]);
    }

    #[tokio::test]
    async fn test_sign_up_duplicate_email() {
        let f = fixture();
        f.remote.register(&email("asha@aztec.farm"), "secret1", "asha");

        let err = f
            .auth
            .sign_up("asha@aztec.farm", "secret2", "asha2", "", false)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::UserAlreadyExists);
        assert!(!f.auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_up_rejects_short_password_before_remote() {
        let f = fixture();
        let err = f
            .auth
            .sign_up("asha@aztec.farm", "12345", "asha", "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword(_)));
        assert_eq!(f.remote.call_count(RemoteOp::CreateAccount), 0);
    }

    #[tokio::test]
    async fn test_sign_up_rolls_back_when_profile_fails() {
        let f = fixture();
        f.remote.fail_next(RemoteOp::CreateProfile, 1);

        let err = f
            .auth
            .sign_up("asha@aztec.farm", "secret1", "asha", "", true)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ProfileInconsistency(_)));
        assert!(!f.remote.has_account(&email("asha@aztec.farm")));
        assert_eq!(f.remote.call_count(RemoteOp::RevokeCredential), 1);
        assert_eq!(f.remote.session_count(), 0);
        assert!(!f.auth.is_authenticated());
        assert!(f.storage.session_token().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_without_profile_signs_credential_out() {
        let f = fixture();
        let user_id = f
            .remote
            .register_without_profile(&email("ghost@aztec.farm"), "secret1");

        let err = f
            .auth
            .sign_in("ghost@aztec.farm", "secret1", false)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ProfileInconsistency(_)));
        assert!(!f.remote.is_signed_in(&user_id));
        assert!(!f.auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_in_wrong_password() {
        let f = fixture();
        f.remote.register(&email("asha@aztec.farm"), "secret1", "asha");

        let err = f
            .auth
            .sign_in("asha@aztec.farm", "nope-nope", false)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_second_sign_in_is_rejected() {
        let f = fixture();
        f.remote.register(&email("asha@aztec.farm"), "secret1", "asha");
        f.auth.sign_in("asha@aztec.farm", "secret1", false).await.unwrap();

        let err = f
            .auth
            .sign_in("asha@aztec.farm", "secret1", true)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::AlreadyAuthenticated);
        assert_eq!(f.remote.session_count(), 1);
    }

    #[tokio::test]
    async fn test_sign_out_clears_everything() {
        let f = fixture();
        f.remote.register(&email("asha@aztec.farm"), "secret1", "asha");
        f.auth.sign_in("asha@aztec.farm", "secret1", true).await.unwrap();
        f.storage.durable().set(keys::CART, "[]");

        f.auth.sign_out().await;

        assert!(!f.auth.is_authenticated());
        assert_eq!(f.remote.session_count(), 0);
        for key in keys::ALL {
            assert!(f.storage.durable().get(key).is_none());
            assert!(f.storage.tab().get(key).is_none());
        }
        assert_eq!(*f.recorder.ended.lock().unwrap(), [TerminationReason::SignOut]);
    }

    #[tokio::test]
    async fn test_init_restores_remembered_session() {
        let f = fixture();
        let user = f.remote.register(&email("asha@aztec.farm"), "secret1", "asha");
        f.auth.sign_in("asha@aztec.farm", "secret1", true).await.unwrap();

        // A new page load over the same storage.
        let sessions = Arc::new(SessionStore::new(
            Arc::new(f.remote.clone()),
            f.storage.clone(),
            Arc::new(f.clock.clone()),
            SessionPolicy::default(),
        ));
        let reloaded = AuthController::new(Arc::new(f.remote.clone()), sessions);
        assert!(reloaded.is_loading());

        assert_eq!(reloaded.init().await.map(|u| u.id), Some(user.id));
        assert!(!reloaded.is_loading());
    }

    #[tokio::test]
    async fn test_init_without_token_finishes_unauthenticated() {
        let f = fixture();
        assert!(f.auth.init().await.is_none());
        assert_eq!(
            f.auth.snapshot(),
            AuthSnapshot {
                current_user: None,
                is_loading: false,
            }
        );
    }

    #[tokio::test]
    async fn test_init_times_out_on_stalled_remote() {
        let policy = SessionPolicy {
            startup_timeout: Duration::from_millis(50),
            ..SessionPolicy::default()
        };
        let f = fixture_with(policy);
        f.remote.register(&email("asha@aztec.farm"), "secret1", "asha");
        f.auth.sign_in("asha@aztec.farm", "secret1", true).await.unwrap();

        let sessions = Arc::new(SessionStore::new(
            Arc::new(f.remote.clone()),
            f.storage.clone(),
            Arc::new(f.clock.clone()),
            policy,
        ));
        let reloaded = AuthController::new(Arc::new(f.remote.clone()), sessions);
        f.remote.set_latency(Duration::from_secs(30));

        let user = tokio::time::timeout(Duration::from_secs(5), reloaded.init())
            .await
            .unwrap();

        assert!(user.is_none());
        assert!(!reloaded.is_loading());
        // The token survives so the next load can retry.
        assert!(f.storage.session_token().is_some());
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_plain_session() {
        let f = fixture();
        f.remote.register(&email("asha@aztec.farm"), "secret1", "asha");
        f.auth.sign_in("asha@aztec.farm", "secret1", false).await.unwrap();

        f.auth.on_visibility_change(Visibility::Hidden).await;
        f.clock.advance(TimeDelta::minutes(20));
        f.auth.on_visibility_change(Visibility::Visible).await;

        assert!(!f.auth.is_authenticated());
        assert_eq!(
            *f.recorder.ended.lock().unwrap(),
            [TerminationReason::IdleTimeout]
        );
    }

    #[tokio::test]
    async fn test_sign_out_is_local_first_when_remote_stalls() {
        let f = fixture();
        f.remote.register(&email("asha@aztec.farm"), "secret1", "asha");
        f.auth.sign_in("asha@aztec.farm", "secret1", true).await.unwrap();
        f.remote.set_latency(Duration::from_secs(60));

        tokio::time::timeout(Duration::from_secs(2), f.auth.sign_out())
            .await
            .unwrap();

        assert!(!f.auth.is_authenticated());
        assert!(f.storage.session_token().is_none());
        assert_eq!(*f.recorder.ended.lock().unwrap(), [TerminationReason::SignOut]);

        // The next transition is not blocked by the stalled cleanup.
        f.remote.set_latency(Duration::ZERO);
        f.auth.sign_in("asha@aztec.farm", "secret1", false).await.unwrap();
        assert!(f.auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_unload_ends_plain_session_only() {
        let f = fixture();
        f.remote.register(&email("asha@aztec.farm"), "secret1", "asha");
        f.auth.sign_in("asha@aztec.farm", "secret1", true).await.unwrap();

        f.auth.on_page_unload().await;
        assert!(f.auth.is_authenticated());

        f.auth.sign_out().await;
        f.auth.sign_in("asha@aztec.farm", "secret1", false).await.unwrap();
        f.auth.on_page_unload().await;
        assert!(!f.auth.is_authenticated());
        assert_eq!(f.remote.session_count(), 0);
    }
}
