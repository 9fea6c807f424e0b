//! Local key/value storage adapter.
//!
//! Models the two browser storage scopes the storefront relies on:
//!
//! - **durable** storage survives reloads and browser restarts
//!   (`localStorage`), used for remembered sessions and the cart cache;
//! - **tab** storage lives only as long as the tab (`sessionStorage`), used
//!   for the token of a non-remembered session.
//!
//! Only the Session Store writes the token/flag/timestamp keys and only the
//! Ledger Engine writes the cart/listing keys. Teardown removes the whole
//! group in one call per scope.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;

use aztec_core::SessionToken;

use crate::models::session::keys;

/// A synchronous string key/value store.
///
/// Implementations must apply `remove_many` as one step: readers never
/// observe a state where only part of the keys are gone.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;
    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str);
    /// Remove a value if present.
    fn remove(&self, key: &str);
    /// Remove several values at once.
    fn remove_many(&self, keys: &[&str]);
}

/// In-memory store. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn remove_many(&self, keys: &[&str]) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            entries.remove(*key);
        }
    }
}

/// Where a session token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
    Durable,
    Tab,
}

/// The pair of browser storage scopes.
#[derive(Clone)]
pub struct BrowserStorage {
    durable: Arc<dyn KeyValueStore>,
    tab: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for BrowserStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserStorage").finish_non_exhaustive()
    }
}

impl BrowserStorage {
    /// Wrap a durable and a tab-scoped store.
    #[must_use]
    pub fn new(durable: Arc<dyn KeyValueStore>, tab: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, tab }
    }

    /// Two fresh in-memory scopes.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Durable scope.
    #[must_use]
    pub fn durable(&self) -> &dyn KeyValueStore {
        self.durable.as_ref()
    }

    /// Tab scope.
    #[must_use]
    pub fn tab(&self) -> &dyn KeyValueStore {
        self.tab.as_ref()
    }

    // =========================================================================
    // Session keys
    // =========================================================================

    /// Find the stored session token, preferring the tab scope.
    #[must_use]
    pub fn session_token(&self) -> Option<(SessionToken, TokenScope)> {
        self.tab
            .get(keys::SESSION_TOKEN)
            .map(|t| (SessionToken::from_raw(t), TokenScope::Tab))
            .or_else(|| {
                self.durable
                    .get(keys::SESSION_TOKEN)
                    .map(|t| (SessionToken::from_raw(t), TokenScope::Durable))
            })
            .filter(|(t, _)| !t.expose().is_empty())
    }

    /// Store the token in the scope matching `remember` and drop it from the
    /// other scope. Also records the remember-me flag.
    pub fn write_session(&self, token: &SessionToken, remember: bool) {
        if remember {
            self.durable.set(keys::SESSION_TOKEN, token.expose());
            self.tab.remove(keys::SESSION_TOKEN);
        } else {
            self.tab.set(keys::SESSION_TOKEN, token.expose());
            self.durable.remove(keys::SESSION_TOKEN);
        }
        self.durable
            .set(keys::REMEMBER_ME, if remember { "true" } else { "false" });
    }

    /// Stored remember-me flag.
    #[must_use]
    pub fn remember_flag(&self) -> bool {
        self.durable.get(keys::REMEMBER_ME).as_deref() == Some("true")
    }

    /// Remove every session and cache key from both scopes.
    pub fn clear_session_group(&self) {
        self.tab.remove_many(keys::ALL);
        self.durable.remove_many(keys::ALL);
    }

    /// Remove the tab-scoped token and all cache keys.
    ///
    /// Used on unload of a non-remembered session.
    pub fn clear_tab_session_and_caches(&self) {
        self.tab.remove_many(keys::ALL);
        self.durable.remove_many(&[
            keys::HIDDEN_AT,
            keys::CART,
            keys::LISTINGS,
            keys::REMEMBER_ME,
        ]);
    }

    // =========================================================================
    // JSON helpers
    // =========================================================================

    /// Read and decode a JSON value from durable storage.
    ///
    /// # Errors
    ///
    /// Returns the decode error if the stored text is not valid JSON for `T`.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.durable
            .get(key)
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
    }

    /// Encode and write a JSON value to durable storage.
    ///
    /// # Errors
    ///
    /// Returns the encode error; nothing is written in that case.
    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), serde_json::Error> {
        let raw = serde_json::to_string(value)?;
        self.durable.set(key, &raw);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn storage_with_handles() -> (BrowserStorage, MemoryStore, MemoryStore) {
        let durable = MemoryStore::new();
        let tab = MemoryStore::new();
        let storage = BrowserStorage::new(Arc::new(durable.clone()), Arc::new(tab.clone()));
        (storage, durable, tab)
    }

    #[test]
    fn test_remembered_token_goes_to_durable_scope() {
        let (storage, durable, tab) = storage_with_handles();
        let token = SessionToken::from_raw("tok-1");

        storage.write_session(&token, true);

        assert_eq!(durable.get(keys::SESSION_TOKEN).as_deref(), Some("tok-1"));
        assert!(tab.get(keys::SESSION_TOKEN).is_none());
        assert!(storage.remember_flag());
        assert_eq!(storage.session_token().unwrap().1, TokenScope::Durable);
    }

    #[test]
    fn test_plain_token_goes_to_tab_scope_and_evicts_durable() {
        let (storage, durable, tab) = storage_with_handles();
        storage.write_session(&SessionToken::from_raw("old"), true);
        storage.write_session(&SessionToken::from_raw("new"), false);

        assert!(durable.get(keys::SESSION_TOKEN).is_none());
        assert_eq!(tab.get(keys::SESSION_TOKEN).as_deref(), Some("new"));
        assert!(!storage.remember_flag());
    }

    #[test]
    fn test_clear_session_group_removes_every_key() {
        let (storage, durable, tab) = storage_with_handles();
        storage.write_session(&SessionToken::from_raw("tok"), true);
        durable.set(keys::HIDDEN_AT, "1");
        durable.set(keys::CART, "[]");
        durable.set(keys::LISTINGS, "[]");
        durable.set("unrelated", "kept");
        tab.set(keys::SESSION_TOKEN, "tab-tok");

        storage.clear_session_group();

        for key in keys::ALL {
            assert!(durable.get(key).is_none(), "{key} left in durable");
            assert!(tab.get(key).is_none(), "{key} left in tab");
        }
        assert_eq!(durable.get("unrelated").as_deref(), Some("kept"));
    }

    #[test]
    fn test_read_json_reports_corruption() {
        let (storage, durable, _) = storage_with_handles();
        durable.set(keys::CART, "{not json");
        assert!(storage.read_json::<Vec<u32>>(keys::CART).is_err());
        assert!(storage.read_json::<Vec<u32>>(keys::LISTINGS).unwrap().is_none());
    }
}
