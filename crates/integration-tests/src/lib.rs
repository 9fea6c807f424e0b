//! Integration tests for the Aztec Harvest storefront core.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p aztec-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `auth_flows` - Sign-up, sign-in, sign-out and startup
//! - `session_lifecycle` - Idle timeout, unload, reload and expiry
//! - `ledger_properties` - Unit conservation, rejections, cart totals
//! - `sync_recovery` - Remote writes while the service is down
//!
//! Everything runs in-process against [`MemoryRemote`], a [`ManualClock`]
//! and in-memory browser storage. [`Browser`] models one browser profile;
//! `reload` and `open_new_tab` build a fresh [`Storefront`] over the
//! storage a real reload or new tab would see.

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use secrecy::SecretString;
use url::Url;

use aztec_core::{Email, Price, ProductId};
use aztec_storefront::Storefront;
use aztec_storefront::clock::ManualClock;
use aztec_storefront::config::{RetryPolicy, StorefrontConfig};
use aztec_storefront::models::{Product, User};
use aztec_storefront::remote::MemoryRemote;
use aztec_storefront::storage::{BrowserStorage, KeyValueStore, MemoryStore};

pub use aztec_storefront::models::session::keys;

/// Password used for every seeded account.
pub const PASSWORD: &str = "hydro-secret";

/// Startup validation limit used by every test browser.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Default session lifetimes, a short startup timeout and no write retries.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    let mut config = StorefrontConfig::with_remote(
        Url::parse("http://localhost:54321").unwrap(),
        SecretString::from("test-anon-key-0123456789abcdef"),
    );
    config.session.startup_timeout = STARTUP_TIMEOUT;
    config.sync = RetryPolicy::no_retry();
    config
}

/// Clock starting at a fixed morning.
#[must_use]
pub fn start_clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 2, 8, 30, 0).unwrap())
}

/// Register an account with a profile on `remote`.
#[must_use]
pub fn register(remote: &MemoryRemote, email: &str, username: &str) -> User {
    remote.register(&Email::parse(email).unwrap(), PASSWORD, username)
}

/// A catalog product priced in whole rupees.
#[must_use]
pub fn product(id: &str, name: &str, rupees: u32) -> Product {
    Product::new(id, name, Price::from_units(rupees))
}

/// Shorthand for a product id.
#[must_use]
pub fn pid(id: &str) -> ProductId {
    ProductId::new(id)
}

/// One browser profile: durable storage, the current tab's storage and the
/// storefront running in that tab.
pub struct Browser {
    pub remote: MemoryRemote,
    pub clock: ManualClock,
    pub durable: MemoryStore,
    pub tab: MemoryStore,
    pub app: Storefront,
}

impl Browser {
    /// A fresh browser profile with empty storage.
    #[must_use]
    pub fn new(remote: &MemoryRemote, clock: &ManualClock) -> Self {
        Self::build(remote, clock, MemoryStore::new(), MemoryStore::new())
    }

    fn build(
        remote: &MemoryRemote,
        clock: &ManualClock,
        durable: MemoryStore,
        tab: MemoryStore,
    ) -> Self {
        let storage = BrowserStorage::new(Arc::new(durable.clone()), Arc::new(tab.clone()));
        let app = Storefront::new(
            test_config(),
            Arc::new(remote.clone()),
            storage,
            Arc::new(clock.clone()),
        );
        Self {
            remote: remote.clone(),
            clock: clock.clone(),
            durable,
            tab,
            app,
        }
    }

    /// Start the storefront (startup validation and sync worker).
    pub async fn boot(self) -> Self {
        self.app.init().await;
        self
    }

    /// Reload the page in the same tab: both storage scopes survive.
    pub async fn reload(self) -> Self {
        self.app.dispose();
        Self::build(&self.remote, &self.clock, self.durable, self.tab)
            .boot()
            .await
    }

    /// Close the tab and open the storefront in a new one: only durable
    /// storage survives.
    pub async fn open_new_tab(self) -> Self {
        self.app.dispose();
        Self::build(&self.remote, &self.clock, self.durable, MemoryStore::new())
            .boot()
            .await
    }

    /// Sign in with the seeded password.
    pub async fn sign_in(&self, email: &str, remember: bool) -> User {
        self.app.auth().sign_in(email, PASSWORD, remember).await.unwrap()
    }

    /// Flush queued remote writes.
    pub async fn settle(&self) {
        let failures = self.app.sync().drain().await;
        assert!(failures.is_empty(), "unexpected sync failures: {failures:?}");
    }

    /// Whether any session or cache key is present in either scope.
    #[must_use]
    pub fn has_any_session_key(&self) -> bool {
        keys::ALL
            .iter()
            .any(|key| self.durable.get(key).is_some() || self.tab.get(key).is_some())
    }
}
