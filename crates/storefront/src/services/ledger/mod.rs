//! Ledger engine: purchase cart, personal inventory and marketplace listings.
//!
//! Every mutation is a [`LedgerAction`] applied by the pure [`reduce`]
//! function under one lock, so operations take effect in dispatch order and
//! a rejected operation never leaves a partial change. Committed changes
//! are mirrored to the remote service through the [`SyncQueue`]; a failed
//! remote write never rolls local state back.
//!
//! The engine subscribes to session events: it hydrates on
//! `session_established` and wipes itself on `session_terminated`.

mod cache;
mod error;
mod reducer;

pub use error::LedgerError;
pub use reducer::{LedgerAction, LedgerState, reduce};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use aztec_core::{OrderStatus, Price, ProductId, UserId};

use self::cache::LedgerCache;
use crate::error::add_breadcrumb;
use crate::events::{SessionObserver, TerminationReason};
use crate::models::{
    CartLine, InventoryEntry, ListingEntry, Order, OrderDraft, OrderLine, Product,
    ShippingAddress,
};
use crate::remote::RemoteService;
use crate::services::sync::SyncQueue;
use crate::storage::BrowserStorage;

/// Ledger engine.
pub struct LedgerEngine {
    state: Mutex<LedgerState>,
    /// Mirror cart and listings locally (remembered sessions only).
    persist: AtomicBool,
    cache: LedgerCache,
    remote: Arc<dyn RemoteService>,
    sync: Arc<SyncQueue>,
}

impl std::fmt::Debug for LedgerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEngine")
            .field("state", &*self.state())
            .field("persist", &self.persist.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl LedgerEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteService>,
        storage: BrowserStorage,
        sync: Arc<SyncQueue>,
    ) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            persist: AtomicBool::new(false),
            cache: LedgerCache::new(storage),
            remote,
            sync,
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The queue carrying this engine's remote writes.
    #[must_use]
    pub const fn sync_queue(&self) -> &Arc<SyncQueue> {
        &self.sync
    }

    /// Apply an action, update the cache and queue the remote writes.
    ///
    /// # Errors
    ///
    /// Returns the reducer's validation error; nothing changes in that case.
    pub fn dispatch(&self, action: LedgerAction) -> Result<(), LedgerError> {
        let name = action.name();
        let touches_cache = action.touches_cache();

        let ops = {
            let mut state = self.state();
            let ops = reduce(&mut state, action).inspect_err(|e| {
                debug!(action = name, error = %e, "Ledger action rejected");
            })?;
            if touches_cache && self.persist.load(Ordering::SeqCst) {
                self.cache.save(&state);
            }
            ops
        };

        if let Some(first) = ops.first() {
            let product = first.product_id().to_string();
            add_breadcrumb("ledger", name, Some(&[("product_id", product.as_str())]));
            self.sync.enqueue(ops);
        }
        Ok(())
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// Add `quantity` units of `product` to the cart.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidQuantity` for zero and `CartOverflow` if the
    /// cart total would no longer be representable.
    pub fn add_to_cart(&self, product: &Product, quantity: u32) -> Result<(), LedgerError> {
        self.dispatch(LedgerAction::AddToCart {
            product: product.clone(),
            quantity,
        })
    }

    /// Add a single unit of `product` to the cart.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidQuantity` if the line would overflow.
    pub fn add_one(&self, product: &Product) -> Result<(), LedgerError> {
        self.add_to_cart(product, 1)
    }

    /// Set a line's quantity. Zero or less removes the line.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidQuantity` if `quantity` does not fit.
    pub fn update_cart_quantity(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<(), LedgerError> {
        self.dispatch(LedgerAction::UpdateCartQuantity {
            product_id: product_id.clone(),
            quantity,
        })
    }

    /// Remove a line from the cart.
    pub fn remove_from_cart(&self, product_id: &ProductId) {
        let _ = self.dispatch(LedgerAction::RemoveFromCart {
            product_id: product_id.clone(),
        });
    }

    /// Empty the cart.
    pub fn clear_cart(&self) {
        let _ = self.dispatch(LedgerAction::ClearCart);
    }

    /// Cart lines in insertion order.
    #[must_use]
    pub fn cart_lines(&self) -> Vec<CartLine> {
        self.state().cart.clone()
    }

    /// Cart total.
    #[must_use]
    pub fn cart_total(&self) -> Price {
        self.state().cart_total()
    }

    /// Units in the cart.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.state().item_count()
    }

    // =========================================================================
    // Inventory and listings
    // =========================================================================

    /// Move `quantity` units from inventory into a listing at `price`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InsufficientStock` when `quantity` exceeds the
    /// unlisted inventory, `InvalidQuantity` for zero units, `InvalidPrice`
    /// for a zero price, `NotSignedIn` without an owner.
    pub fn list_for_sale(
        &self,
        product: &Product,
        quantity: u32,
        price: Price,
    ) -> Result<(), LedgerError> {
        self.dispatch(LedgerAction::ListForSale {
            product_id: product.id.clone(),
            quantity,
            price,
        })
    }

    /// Take a listing down and return its units to inventory.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NoActiveListing` if the product is not listed.
    pub fn remove_listing(&self, product_id: &ProductId) -> Result<(), LedgerError> {
        self.dispatch(LedgerAction::RemoveListing {
            product_id: product_id.clone(),
        })
    }

    /// Hold `quantity` units of inventory without listing them.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InsufficientStock` when over-drawing.
    pub fn reserve_stock(&self, product_id: &ProductId, quantity: u32) -> Result<(), LedgerError> {
        self.dispatch(LedgerAction::ReserveStock {
            product_id: product_id.clone(),
            quantity,
        })
    }

    /// Credit purchased units to inventory.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidQuantity` for zero.
    pub fn receive_stock(&self, product_id: &ProductId, quantity: u32) -> Result<(), LedgerError> {
        self.dispatch(LedgerAction::ReceiveStock {
            product_id: product_id.clone(),
            quantity,
        })
    }

    /// Record that a buyer took `quantity` units from a listing.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NoActiveListing` or `InsufficientStock` when the
    /// listing cannot cover the sale.
    pub fn record_listing_sale(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(), LedgerError> {
        self.dispatch(LedgerAction::RecordListingSale {
            product_id: product_id.clone(),
            quantity,
        })
    }

    /// Replace inventory and listings with a remote snapshot.
    ///
    /// Queued remote writes that were not yet applied are dropped.
    pub fn load_user_data(&self, inventory: Vec<InventoryEntry>, listings: Vec<ListingEntry>) {
        let dropped = self.sync.discard_pending();
        if dropped > 0 {
            warn!(dropped, "Dropped unsynced ledger writes on reload");
        }
        let _ = self.dispatch(LedgerAction::LoadUserData {
            inventory,
            listings,
        });
    }

    /// Flush queued writes, then reload inventory and listings from the
    /// remote service.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotSignedIn` without an owner, or
    /// `LedgerError::Remote` if either fetch fails (state is kept).
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), LedgerError> {
        let owner = self.owner().ok_or(LedgerError::NotSignedIn)?;

        let failures = self.sync.drain().await;
        if !failures.is_empty() {
            warn!(failures = failures.len(), "Reloading with unsynced writes");
        }

        let inventory = self.remote.get_inventory(&owner).await?;
        let listings = self.remote.get_listings(&owner).await?;

        // The session may have ended while fetching.
        if self.owner().as_ref() != Some(&owner) {
            return Ok(());
        }
        info!(
            inventory = inventory.len(),
            listings = listings.len(),
            "Ledgers loaded"
        );
        self.load_user_data(inventory, listings);
        Ok(())
    }

    /// Unlisted units of a product.
    #[must_use]
    pub fn get_inventory_quantity(&self, product_id: &ProductId) -> u32 {
        self.state().inventory_quantity(product_id)
    }

    /// Listed units of a product.
    #[must_use]
    pub fn get_listing_quantity(&self, product_id: &ProductId) -> u32 {
        self.state().listing_quantity(product_id)
    }

    /// Active listing of a product.
    #[must_use]
    pub fn listing(&self, product_id: &ProductId) -> Option<ListingEntry> {
        self.state().listings.get(product_id).cloned()
    }

    /// Listings from the local mirror, for display while offline.
    #[must_use]
    pub fn offline_listings(&self) -> Vec<ListingEntry> {
        self.cache.load_listings()
    }

    /// Copy of the whole ledger state.
    #[must_use]
    pub fn snapshot(&self) -> LedgerState {
        self.state().clone()
    }

    /// Owner of the inventory and listings.
    #[must_use]
    pub fn owner(&self) -> Option<UserId> {
        self.state().owner.clone()
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Build an order from the cart.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotSignedIn`, `EmptyCart`, or
    /// `MissingShippingFields` naming every blank required field.
    pub fn order_draft(&self, shipping_address: ShippingAddress) -> Result<OrderDraft, LedgerError> {
        let state = self.state();
        let user_id = state.owner.clone().ok_or(LedgerError::NotSignedIn)?;
        if state.cart.is_empty() {
            return Err(LedgerError::EmptyCart);
        }
        let missing = shipping_address.missing_fields();
        if !missing.is_empty() {
            return Err(LedgerError::MissingShippingFields(missing));
        }
        Ok(OrderDraft {
            user_id,
            total_amount: state.cart_total(),
            status: OrderStatus::Pending,
            shipping_address,
            lines: state.cart.iter().map(OrderLine::from).collect(),
        })
    }

    /// The order for `draft` was placed: credit its lines to inventory and
    /// empty the cart.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::EmptyCart` if the cart was already emptied.
    pub fn complete_checkout(&self, draft: &OrderDraft) -> Result<(), LedgerError> {
        self.dispatch(LedgerAction::CompleteCheckout {
            lines: draft
                .lines
                .iter()
                .map(|l| (l.product_id.clone(), l.quantity))
                .collect(),
        })
    }

    /// Store `draft` as an order, then complete the checkout locally.
    ///
    /// Nothing changes locally if the remote service refuses the order.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotSignedIn` if the draft belongs to someone
    /// else, or `LedgerError::Remote` if the order could not be stored.
    #[instrument(skip(self, draft), fields(lines = draft.lines.len()))]
    pub async fn place_order(&self, draft: &OrderDraft) -> Result<Order, LedgerError> {
        if self.owner().as_ref() != Some(&draft.user_id) {
            return Err(LedgerError::NotSignedIn);
        }
        let order = self.remote.create_order(draft).await?;
        info!(order_id = %order.id, total = %order.total_amount, "Order placed");
        add_breadcrumb("ledger", "place_order", Some(&[("order_id", order.id.as_str())]));

        // The session may have ended while placing; the order stands.
        if self.owner().as_ref() == Some(&draft.user_id) {
            if let Err(e) = self.complete_checkout(draft) {
                warn!(order_id = %order.id, error = %e, "Order placed but cart already emptied");
            }
        }
        Ok(order)
    }

    /// Orders of the signed-in user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotSignedIn` without an owner, or
    /// `LedgerError::Remote` if the fetch fails.
    pub async fn order_history(&self) -> Result<Vec<Order>, LedgerError> {
        let owner = self.owner().ok_or(LedgerError::NotSignedIn)?;
        Ok(self.remote.get_orders(&owner).await?)
    }
}

#[async_trait]
impl SessionObserver for LedgerEngine {
    async fn session_established(&self, user_id: &UserId, remember: bool) {
        self.persist.store(remember, Ordering::SeqCst);
        let _ = self.dispatch(LedgerAction::Begin {
            owner: user_id.clone(),
        });

        if remember {
            let cached = self.cache.load_cart();
            if !cached.is_empty() && self.state().cart.is_empty() {
                let _ = self.dispatch(LedgerAction::RestoreCart { lines: cached });
            }
            self.cache.save(&self.state());
        } else {
            self.cache.clear();
        }

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Could not load ledgers after sign-in");
        }
    }

    fn session_terminated(&self, reason: TerminationReason) {
        self.persist.store(false, Ordering::SeqCst);
        let dropped = self.sync.discard_pending();
        let _ = self.dispatch(LedgerAction::Reset);
        self.cache.clear();
        info!(%reason, dropped, "Ledgers cleared");
    }
}
