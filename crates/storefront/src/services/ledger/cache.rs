//! Local mirror of the cart and listings.
//!
//! Only remembered sessions are mirrored. A snapshot that does not decode is
//! dropped and treated as empty.

use tracing::warn;

use crate::models::session::keys;
use crate::models::{CartLine, ListingEntry};
use crate::storage::BrowserStorage;

use super::reducer::LedgerState;

#[derive(Debug, Clone)]
pub(super) struct LedgerCache {
    storage: BrowserStorage,
}

impl LedgerCache {
    pub(super) const fn new(storage: BrowserStorage) -> Self {
        Self { storage }
    }

    /// Cached cart lines, or empty if absent or corrupt.
    pub(super) fn load_cart(&self) -> Vec<CartLine> {
        match self.storage.read_json::<Vec<CartLine>>(keys::CART) {
            Ok(lines) => lines.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Discarding corrupt cart cache");
                self.clear();
                Vec::new()
            }
        }
    }

    /// Cached listings, or empty if absent or corrupt.
    pub(super) fn load_listings(&self) -> Vec<ListingEntry> {
        match self.storage.read_json::<Vec<ListingEntry>>(keys::LISTINGS) {
            Ok(listings) => listings.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Discarding corrupt listings cache");
                self.storage.durable().remove(keys::LISTINGS);
                Vec::new()
            }
        }
    }

    pub(super) fn save(&self, state: &LedgerState) {
        let listings: Vec<&ListingEntry> = state.listings.values().collect();
        let written = self
            .storage
            .write_json(keys::CART, &state.cart)
            .and_then(|()| self.storage.write_json(keys::LISTINGS, &listings));
        if let Err(e) = written {
            warn!(error = %e, "Could not write ledger cache");
        }
    }

    pub(super) fn clear(&self) {
        self.storage
            .durable()
            .remove_many(&[keys::CART, keys::LISTINGS]);
    }
}
