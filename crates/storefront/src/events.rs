//! Session lifecycle events.
//!
//! The Auth Controller announces when a session starts and ends; other
//! services (the Ledger Engine) subscribe instead of reading the session's
//! storage keys themselves.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use aztec_core::UserId;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The user signed out.
    SignOut,
    /// Validation found the session expired or unknown.
    Expired,
    /// The tab stayed hidden longer than the idle threshold.
    IdleTimeout,
    /// A non-remembered session's page was closed.
    PageUnload,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SignOut => "sign_out",
            Self::Expired => "expired",
            Self::IdleTimeout => "idle_timeout",
            Self::PageUnload => "page_unload",
        })
    }
}

/// Receives session lifecycle events.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    /// A session was established (sign-in, sign-up or successful startup
    /// validation). May fetch remote data.
    async fn session_established(&self, user_id: &UserId, remember: bool);

    /// The session ended. Must only touch local state.
    fn session_terminated(&self, reason: TerminationReason);
}

/// Handle returned by [`SessionEvents::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Registered observers, notified in subscription order.
#[derive(Default)]
pub struct SessionEvents {
    observers: Mutex<Vec<(SubscriptionId, Arc<dyn SessionObserver>)>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEvents")
            .field("observers", &self.snapshot().len())
            .finish()
    }
}

impl SessionEvents {
    /// Register an observer.
    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> SubscriptionId {
        let id = SubscriptionId(
            self.next_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        );
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    fn snapshot(&self) -> Vec<Arc<dyn SessionObserver>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect()
    }

    pub(crate) async fn established(&self, user_id: &UserId, remember: bool) {
        for observer in self.snapshot() {
            observer.session_established(user_id, remember).await;
        }
    }

    pub(crate) fn terminated(&self, reason: TerminationReason) {
        for observer in self.snapshot() {
            observer.session_terminated(reason);
        }
    }
}
