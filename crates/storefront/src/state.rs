//! Storefront state shared with the presentation layer.

use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::StorefrontConfig;
use crate::events::SubscriptionId;
use crate::models::ListingEntry;
use crate::remote::{RemoteError, RemoteService, RestRemote};
use crate::services::auth::AuthController;
use crate::services::ledger::LedgerEngine;
use crate::services::session::SessionStore;
use crate::services::sync::SyncQueue;
use crate::storage::BrowserStorage;

/// Storefront state shared across the presentation layer.
///
/// This struct is cheaply cloneable via `Arc` and wires the session store,
/// auth controller, sync queue and ledger engine together. The ledger
/// engine is subscribed to the controller's session events.
#[derive(Clone)]
pub struct Storefront {
    inner: Arc<StorefrontInner>,
}

struct StorefrontInner {
    config: StorefrontConfig,
    remote: Arc<dyn RemoteService>,
    storage: BrowserStorage,
    sessions: Arc<SessionStore>,
    auth: AuthController,
    ledger: Arc<LedgerEngine>,
    sync: Arc<SyncQueue>,
    ledger_subscription: SubscriptionId,
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("auth", &self.inner.auth)
            .field("ledger", &self.inner.ledger)
            .finish_non_exhaustive()
    }
}

impl Storefront {
    /// Wire the services over the given remote service, storage and clock.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `remote` - Remote data/auth service
    /// * `storage` - Browser storage (durable and tab scopes)
    /// * `clock` - Time source for expiry and idle checks
    #[must_use]
    pub fn new(
        config: StorefrontConfig,
        remote: Arc<dyn RemoteService>,
        storage: BrowserStorage,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&remote),
            storage.clone(),
            clock,
            config.session,
        ));
        let auth = AuthController::new(Arc::clone(&remote), Arc::clone(&sessions));
        let sync = Arc::new(SyncQueue::new(Arc::clone(&remote), config.sync));
        let ledger = Arc::new(LedgerEngine::new(
            Arc::clone(&remote),
            storage.clone(),
            Arc::clone(&sync),
        ));
        let ledger_subscription = auth.events().subscribe(ledger.clone());

        Self {
            inner: Arc::new(StorefrontInner {
                config,
                remote,
                storage,
                sessions,
                auth,
                ledger,
                sync,
                ledger_subscription,
            }),
        }
    }

    /// Connect to the configured REST backend with the system clock.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the HTTP client cannot be built.
    pub fn connect(config: StorefrontConfig, storage: BrowserStorage) -> Result<Self, RemoteError> {
        let remote = Arc::new(RestRemote::new(&config.remote)?);
        Ok(Self::new(config, remote, storage, Arc::new(SystemClock)))
    }

    /// Run the startup sequence and start the sync worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn init(&self) {
        self.inner.sync.start();
        let user = self.inner.auth.init().await;
        info!(signed_in = user.is_some(), "Storefront initialised");
    }

    /// Stop the sync worker and detach the ledger from session events.
    ///
    /// Queued writes are kept; call [`SyncQueue::drain`] first to flush them.
    pub fn dispose(&self) {
        self.inner.sync.stop();
        self.inner
            .auth
            .events()
            .unsubscribe(self.inner.ledger_subscription);
        info!("Storefront disposed");
    }

    /// Active listings from every seller, for the marketplace page.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the listings cannot be fetched.
    pub async fn marketplace(&self) -> Result<Vec<ListingEntry>, RemoteError> {
        self.inner.remote.get_all_active_listings().await
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the browser storage.
    #[must_use]
    pub fn storage(&self) -> &BrowserStorage {
        &self.inner.storage
    }

    /// Get a reference to the session store.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// Get a reference to the auth controller.
    #[must_use]
    pub fn auth(&self) -> &AuthController {
        &self.inner.auth
    }

    /// Get a reference to the ledger engine.
    #[must_use]
    pub fn ledger(&self) -> &LedgerEngine {
        &self.inner.ledger
    }

    /// Get a reference to the remote sync queue.
    #[must_use]
    pub fn sync(&self) -> &Arc<SyncQueue> {
        &self.inner.sync
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;
    use url::Url;

    use aztec_core::{Email, Price, ProductId};

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RetryPolicy;
    use crate::models::Product;
    use crate::remote::MemoryRemote;

    fn storefront(remote: &MemoryRemote) -> Storefront {
        let mut config = StorefrontConfig::with_remote(
            Url::parse("http://localhost:54321").unwrap(),
            SecretString::from("test-anon-key-0123456789abcdef"),
        );
        config.sync = RetryPolicy::no_retry();
        Storefront::new(
            config,
            Arc::new(remote.clone()),
            BrowserStorage::in_memory(),
            Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            )),
        )
    }

    #[tokio::test]
    async fn test_sign_in_hydrates_ledger() {
        let remote = MemoryRemote::new();
        let user = remote.register(&Email::parse("asha@aztec.farm").unwrap(), "secret1", "asha");
        remote.seed_inventory(&user.id, &ProductId::new("seed-basil"), 12);

        let app = storefront(&remote);
        app.init().await;
        app.auth().sign_in("asha@aztec.farm", "secret1", false).await.unwrap();

        assert_eq!(app.ledger().owner(), Some(user.id));
        assert_eq!(
            app.ledger().get_inventory_quantity(&ProductId::new("seed-basil")),
            12
        );
        app.dispose();
    }

    #[tokio::test]
    async fn test_sign_out_wipes_ledger() {
        let remote = MemoryRemote::new();
        remote.register(&Email::parse("asha@aztec.farm").unwrap(), "secret1", "asha");

        let app = storefront(&remote);
        app.init().await;
        app.auth().sign_in("asha@aztec.farm", "secret1", true).await.unwrap();
        let basil = Product::new("seed-basil", "Basil seeds", Price::from_units(50));
        app.ledger().add_to_cart(&basil, 2).unwrap();

        app.auth().sign_out().await;

        assert!(app.ledger().cart_lines().is_empty());
        assert!(app.ledger().owner().is_none());
        app.dispose();
    }

    #[tokio::test]
    async fn test_dispose_detaches_ledger() {
        let remote = MemoryRemote::new();
        remote.register(&Email::parse("asha@aztec.farm").unwrap(), "secret1", "asha");

        let app = storefront(&remote);
        app.dispose();
        app.auth().sign_in("asha@aztec.farm", "secret1", false).await.unwrap();

        assert!(app.ledger().owner().is_none());
    }
}
