//! Ledger state and its reducer.
//!
//! All ledger mutations go through [`reduce`]. Each arm validates its
//! arguments against the current state first and only then writes, so a
//! rejected action leaves the state exactly as it was. The returned
//! [`SyncOp`]s mirror the committed change on the remote service.

use std::collections::BTreeMap;

use aztec_core::{ListingStatus, Price, ProductId, UserId};

use super::LedgerError;
use crate::models::{CartLine, InventoryEntry, ListingEntry, Product};
use crate::services::sync::SyncOp;

/// The three ledgers of the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    /// User the inventory and listings belong to. The cart also works
    /// without one.
    pub owner: Option<UserId>,
    /// Cart lines in the order they were added.
    pub cart: Vec<CartLine>,
    /// Unlisted units per product.
    pub inventory: BTreeMap<ProductId, u32>,
    /// Active listings per product.
    pub listings: BTreeMap<ProductId, ListingEntry>,
}

impl LedgerState {
    /// Unlisted units of a product.
    #[must_use]
    pub fn inventory_quantity(&self, product_id: &ProductId) -> u32 {
        self.inventory.get(product_id).copied().unwrap_or(0)
    }

    /// Listed units of a product.
    #[must_use]
    pub fn listing_quantity(&self, product_id: &ProductId) -> u32 {
        self.listings.get(product_id).map_or(0, |l| l.quantity)
    }

    /// Cart total, recomputed from the lines.
    #[must_use]
    pub fn cart_total(&self) -> Price {
        self.cart.iter().map(CartLine::subtotal).sum()
    }

    /// Units in the cart, recomputed from the lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.cart
            .iter()
            .fold(0u32, |count, line| count.saturating_add(line.quantity))
    }

    fn owner(&self) -> Result<UserId, LedgerError> {
        self.owner.clone().ok_or(LedgerError::NotSignedIn)
    }

    fn set_inventory(&mut self, product_id: &ProductId, quantity: u32) {
        if quantity == 0 {
            self.inventory.remove(product_id);
        } else {
            self.inventory.insert(product_id.clone(), quantity);
        }
    }
}

/// A ledger mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerAction {
    /// Start tracking ledgers for a user. Inventory and listings are emptied
    /// until the next load; the cart is kept.
    Begin { owner: UserId },
    AddToCart { product: Product, quantity: u32 },
    /// Set a cart line's quantity; zero or less removes the line.
    UpdateCartQuantity { product_id: ProductId, quantity: i64 },
    RemoveFromCart { product_id: ProductId },
    ClearCart,
    /// Replace the cart with cached lines.
    RestoreCart { lines: Vec<CartLine> },
    ListForSale {
        product_id: ProductId,
        quantity: u32,
        price: Price,
    },
    RemoveListing { product_id: ProductId },
    ReserveStock { product_id: ProductId, quantity: u32 },
    ReceiveStock { product_id: ProductId, quantity: u32 },
    /// Someone bought units from the owner's listing.
    RecordListingSale { product_id: ProductId, quantity: u32 },
    /// An order for the cart completed: credit its lines to inventory and
    /// empty the cart.
    CompleteCheckout { lines: Vec<(ProductId, u32)> },
    LoadUserData {
        inventory: Vec<InventoryEntry>,
        listings: Vec<ListingEntry>,
    },
    Reset,
}

impl LedgerAction {
    /// Short name for logs and breadcrumbs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Begin { .. } => "begin",
            Self::AddToCart { .. } => "add_to_cart",
            Self::UpdateCartQuantity { .. } => "update_cart_quantity",
            Self::RemoveFromCart { .. } => "remove_from_cart",
            Self::ClearCart => "clear_cart",
            Self::RestoreCart { .. } => "restore_cart",
            Self::ListForSale { .. } => "list_for_sale",
            Self::RemoveListing { .. } => "remove_listing",
            Self::ReserveStock { .. } => "reserve_stock",
            Self::ReceiveStock { .. } => "receive_stock",
            Self::RecordListingSale { .. } => "record_listing_sale",
            Self::CompleteCheckout { .. } => "complete_checkout",
            Self::LoadUserData { .. } => "load_user_data",
            Self::Reset => "reset",
        }
    }

    /// Whether the action changes the cart or listings, which are mirrored to
    /// the local cache.
    #[must_use]
    pub const fn touches_cache(&self) -> bool {
        !matches!(
            self,
            Self::Begin { .. } | Self::ReserveStock { .. } | Self::ReceiveStock { .. }
        )
    }
}

/// Apply `action` to `state`.
///
/// # Errors
///
/// Returns the validation error and leaves `state` untouched if the action
/// is not allowed in the current state.
pub fn reduce(state: &mut LedgerState, action: LedgerAction) -> Result<Vec<SyncOp>, LedgerError> {
    match action {
        LedgerAction::Begin { owner } => {
            state.owner = Some(owner);
            state.inventory.clear();
            state.listings.clear();
            Ok(Vec::new())
        }

        LedgerAction::AddToCart { product, quantity } => {
            if quantity == 0 {
                return Err(LedgerError::InvalidQuantity(
                    "cart quantity must be at least 1".to_owned(),
                ));
            }
            let mut cart = state.cart.clone();
            match cart.iter_mut().find(|l| l.product_id == product.id) {
                Some(line) => {
                    line.quantity = line.quantity.checked_add(quantity).ok_or_else(|| {
                        LedgerError::InvalidQuantity("cart quantity too large".to_owned())
                    })?;
                }
                None => cart.push(CartLine::new(&product, quantity)),
            }
            checked_total(&cart).ok_or(LedgerError::CartOverflow)?;
            state.cart = cart;
            Ok(Vec::new())
        }

        LedgerAction::UpdateCartQuantity {
            product_id,
            quantity,
        } => {
            if quantity <= 0 {
                state.cart.retain(|l| l.product_id != product_id);
                return Ok(Vec::new());
            }
            let quantity = u32::try_from(quantity).map_err(|_| {
                LedgerError::InvalidQuantity(format!("{quantity} exceeds the cart limit"))
            })?;
            let mut cart = state.cart.clone();
            if let Some(line) = cart.iter_mut().find(|l| l.product_id == product_id) {
                line.quantity = quantity;
            }
            checked_total(&cart).ok_or(LedgerError::CartOverflow)?;
            state.cart = cart;
            Ok(Vec::new())
        }

        LedgerAction::RemoveFromCart { product_id } => {
            state.cart.retain(|l| l.product_id != product_id);
            Ok(Vec::new())
        }

        LedgerAction::ClearCart => {
            state.cart.clear();
            Ok(Vec::new())
        }

        LedgerAction::RestoreCart { lines } => {
            let mut total = Price::ZERO;
            state.cart = lines
                .into_iter()
                .filter(|line| line.quantity > 0)
                .filter(|line| {
                    match line.checked_subtotal().and_then(|sub| total.checked_add(sub)) {
                        Some(next) => {
                            total = next;
                            true
                        }
                        None => false,
                    }
                })
                .collect();
            Ok(Vec::new())
        }

        LedgerAction::ListForSale {
            product_id,
            quantity,
            price,
        } => {
            let owner = state.owner()?;
            require_positive(quantity)?;
            if price.is_zero() {
                return Err(LedgerError::InvalidPrice(
                    "listing price must be above zero".to_owned(),
                ));
            }
            let available = state.inventory_quantity(&product_id);
            if quantity > available {
                return Err(LedgerError::InsufficientStock {
                    product_id,
                    available,
                    requested: quantity,
                });
            }
            let listed = state
                .listing_quantity(&product_id)
                .checked_add(quantity)
                .ok_or_else(|| LedgerError::InvalidQuantity("listing too large".to_owned()))?;

            let remaining = available - quantity;
            state.set_inventory(&product_id, remaining);
            state.listings.insert(
                product_id.clone(),
                ListingEntry {
                    user_id: owner.clone(),
                    product_id: product_id.clone(),
                    quantity: listed,
                    price,
                    status: ListingStatus::Active,
                },
            );

            Ok(vec![
                SyncOp::UpsertInventory {
                    user_id: owner.clone(),
                    product_id: product_id.clone(),
                    quantity: remaining,
                },
                SyncOp::UpsertListing {
                    user_id: owner,
                    product_id,
                    quantity: listed,
                    price,
                },
            ])
        }

        LedgerAction::RemoveListing { product_id } => {
            let owner = state.owner()?;
            let listed = state.listing_quantity(&product_id);
            if !state.listings.contains_key(&product_id) {
                return Err(LedgerError::NoActiveListing(product_id));
            }
            let restored = state
                .inventory_quantity(&product_id)
                .checked_add(listed)
                .ok_or_else(|| LedgerError::InvalidQuantity("inventory too large".to_owned()))?;

            state.listings.remove(&product_id);
            state.set_inventory(&product_id, restored);

            Ok(vec![
                SyncOp::RemoveListing {
                    user_id: owner.clone(),
                    product_id: product_id.clone(),
                },
                SyncOp::UpsertInventory {
                    user_id: owner,
                    product_id,
                    quantity: restored,
                },
            ])
        }

        LedgerAction::ReserveStock {
            product_id,
            quantity,
        } => {
            let owner = state.owner()?;
            require_positive(quantity)?;
            let available = state.inventory_quantity(&product_id);
            if quantity > available {
                return Err(LedgerError::InsufficientStock {
                    product_id,
                    available,
                    requested: quantity,
                });
            }
            let remaining = available - quantity;
            state.set_inventory(&product_id, remaining);
            Ok(vec![SyncOp::UpsertInventory {
                user_id: owner,
                product_id,
                quantity: remaining,
            }])
        }

        LedgerAction::ReceiveStock {
            product_id,
            quantity,
        } => {
            let owner = state.owner()?;
            require_positive(quantity)?;
            let total = state
                .inventory_quantity(&product_id)
                .checked_add(quantity)
                .ok_or_else(|| LedgerError::InvalidQuantity("inventory too large".to_owned()))?;
            state.set_inventory(&product_id, total);
            Ok(vec![SyncOp::UpsertInventory {
                user_id: owner,
                product_id,
                quantity: total,
            }])
        }

        LedgerAction::RecordListingSale {
            product_id,
            quantity,
        } => {
            let owner = state.owner()?;
            require_positive(quantity)?;
            let Some(listing) = state.listings.get(&product_id) else {
                return Err(LedgerError::NoActiveListing(product_id));
            };
            if quantity > listing.quantity {
                return Err(LedgerError::InsufficientStock {
                    product_id,
                    available: listing.quantity,
                    requested: quantity,
                });
            }
            let left = listing.quantity - quantity;
            let price = listing.price;

            if left == 0 {
                state.listings.remove(&product_id);
                Ok(vec![SyncOp::RemoveListing {
                    user_id: owner,
                    product_id,
                }])
            } else {
                if let Some(listing) = state.listings.get_mut(&product_id) {
                    listing.quantity = left;
                }
                Ok(vec![SyncOp::UpsertListing {
                    user_id: owner,
                    product_id,
                    quantity: left,
                    price,
                }])
            }
        }

        LedgerAction::CompleteCheckout { lines } => {
            let owner = state.owner()?;
            if state.cart.is_empty() {
                return Err(LedgerError::EmptyCart);
            }

            let mut credited: BTreeMap<ProductId, u32> = BTreeMap::new();
            for (product_id, quantity) in lines {
                let current = match credited.get(&product_id) {
                    Some(q) => *q,
                    None => state.inventory_quantity(&product_id),
                };
                let total = current.checked_add(quantity).ok_or_else(|| {
                    LedgerError::InvalidQuantity("inventory too large".to_owned())
                })?;
                credited.insert(product_id, total);
            }

            state.cart.clear();
            let mut ops = Vec::with_capacity(credited.len());
            for (product_id, quantity) in credited {
                state.set_inventory(&product_id, quantity);
                ops.push(SyncOp::UpsertInventory {
                    user_id: owner.clone(),
                    product_id,
                    quantity,
                });
            }
            Ok(ops)
        }

        LedgerAction::LoadUserData {
            inventory,
            listings,
        } => {
            state.inventory = inventory
                .into_iter()
                .filter(|e| e.quantity > 0)
                .map(|e| (e.product_id, e.quantity))
                .collect();
            state.listings = listings
                .into_iter()
                .filter(ListingEntry::is_active)
                .map(|l| (l.product_id.clone(), l))
                .collect();
            Ok(Vec::new())
        }

        LedgerAction::Reset => {
            *state = LedgerState::default();
            Ok(Vec::new())
        }
    }
}

fn checked_total(cart: &[CartLine]) -> Option<Price> {
    cart.iter().try_fold(Price::ZERO, |total, line| {
        total.checked_add(line.checked_subtotal()?)
    })
}

fn require_positive(quantity: u32) -> Result<(), LedgerError> {
    if quantity == 0 {
        Err(LedgerError::InvalidQuantity(
            "quantity must be at least 1".to_owned(),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn owned_state(inventory: &[(&str, u32)]) -> LedgerState {
        let mut state = LedgerState::default();
        reduce(
            &mut state,
            LedgerAction::Begin {
                owner: UserId::new("u1"),
            },
        )
        .unwrap();
        for (product, quantity) in inventory {
            state.inventory.insert(ProductId::new(*product), *quantity);
        }
        state
    }

    fn list(product: &str, quantity: u32, price: u32) -> LedgerAction {
        LedgerAction::ListForSale {
            product_id: ProductId::new(product),
            quantity,
            price: Price::from_units(price),
        }
    }

    fn unlist(product: &str) -> LedgerAction {
        LedgerAction::RemoveListing {
            product_id: ProductId::new(product),
        }
    }

    #[test]
    fn test_list_and_unlist_conserve_units() {
        let p1 = ProductId::new("p1");
        let mut state = owned_state(&[("p1", 25)]);
        // Deterministic mix of valid and over-drawing moves.
        let script = [7, 3, 0, 40, 9, 0, 6, 1, 25, 0, 2, 8];

        for step in script {
            let action = if step == 0 { unlist("p1") } else { list("p1", step, 50) };
            let _ = reduce(&mut state, action);
            assert_eq!(
                state.inventory_quantity(&p1) + state.listing_quantity(&p1),
                25,
                "units drifted after step {step}"
            );
        }
    }

    #[test]
    fn test_over_listing_leaves_state_unchanged() {
        let mut state = owned_state(&[("p1", 3)]);
        reduce(&mut state, list("p1", 2, 40)).unwrap();
        let before = state.clone();

        let err = reduce(&mut state, list("p1", 5, 40)).unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                product_id: ProductId::new("p1"),
                available: 1,
                requested: 5,
            }
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_zero_price_listing_is_rejected_without_side_effects() {
        let mut state = owned_state(&[("p1", 10)]);
        let before = state.clone();

        let err = reduce(&mut state, list("p1", 4, 0)).unwrap_err();

        assert!(matches!(err, LedgerError::InvalidPrice(_)));
        assert_eq!(state, before);
    }

    #[test]
    fn test_remove_missing_listing_is_an_error_without_side_effects() {
        let mut state = owned_state(&[("p1", 3)]);
        let before = state.clone();

        assert_eq!(
            reduce(&mut state, unlist("p1")).unwrap_err(),
            LedgerError::NoActiveListing(ProductId::new("p1"))
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_relisting_overwrites_price_and_accumulates() {
        let mut state = owned_state(&[("p1", 10)]);
        reduce(&mut state, list("p1", 4, 50)).unwrap();
        let ops = reduce(&mut state, list("p1", 3, 55)).unwrap();

        let listing = &state.listings[&ProductId::new("p1")];
        assert_eq!(listing.quantity, 7);
        assert_eq!(listing.price, Price::from_units(55));
        assert_eq!(state.inventory_quantity(&ProductId::new("p1")), 3);
        assert_eq!(
            ops,
            [
                SyncOp::UpsertInventory {
                    user_id: UserId::new("u1"),
                    product_id: ProductId::new("p1"),
                    quantity: 3,
                },
                SyncOp::UpsertListing {
                    user_id: UserId::new("u1"),
                    product_id: ProductId::new("p1"),
                    quantity: 7,
                    price: Price::from_units(55),
                },
            ]
        );
    }

    #[test]
    fn test_cart_total_tracks_every_mutation() {
        let basil = Product::new("basil", "Genovese Basil", Price::from_units(40));
        let lettuce = Product::new("lettuce", "Butterhead Lettuce", Price::from_units(65));
        let mut state = LedgerState::default();

        let check = |state: &LedgerState| {
            let expected: Price = state
                .cart
                .iter()
                .map(|l| l.unit_price.times(l.quantity))
                .sum();
            assert_eq!(state.cart_total(), expected);
        };

        reduce(&mut state, LedgerAction::AddToCart { product: basil.clone(), quantity: 2 }).unwrap();
        check(&state);
        reduce(&mut state, LedgerAction::AddToCart { product: lettuce, quantity: 1 }).unwrap();
        reduce(&mut state, LedgerAction::AddToCart { product: basil, quantity: 1 }).unwrap();
        check(&state);
        assert_eq!(state.cart_total(), Price::from_units(185));
        assert_eq!(state.item_count(), 4);

        reduce(
            &mut state,
            LedgerAction::UpdateCartQuantity {
                product_id: ProductId::new("basil"),
                quantity: 0,
            },
        )
        .unwrap();
        check(&state);
        assert_eq!(state.cart.len(), 1);
        assert_eq!(state.cart_total(), Price::from_units(65));

        reduce(
            &mut state,
            LedgerAction::RemoveFromCart {
                product_id: ProductId::new("lettuce"),
            },
        )
        .unwrap();
        check(&state);
        assert_eq!(state.cart_total(), Price::ZERO);
        assert_eq!(state.item_count(), 0);
    }

    #[test]
    fn test_negative_update_removes_line() {
        let mut state = LedgerState::default();
        let basil = Product::new("basil", "Genovese Basil", Price::from_units(40));
        reduce(&mut state, LedgerAction::AddToCart { product: basil, quantity: 2 }).unwrap();

        reduce(
            &mut state,
            LedgerAction::UpdateCartQuantity {
                product_id: ProductId::new("basil"),
                quantity: -3,
            },
        )
        .unwrap();
        assert!(state.cart.is_empty());
    }

    #[test]
    fn test_overflowing_cart_is_rejected_without_side_effects() {
        let huge = huge_price();
        let costly = Product::new("saffron", "Saffron", huge);
        let mut state = LedgerState::default();
        reduce(&mut state, LedgerAction::AddToCart { product: costly.clone(), quantity: 1 }).unwrap();
        let before = state.clone();

        assert_eq!(
            reduce(&mut state, LedgerAction::AddToCart { product: costly, quantity: 1 }).unwrap_err(),
            LedgerError::CartOverflow
        );
        assert_eq!(
            reduce(
                &mut state,
                LedgerAction::UpdateCartQuantity {
                    product_id: ProductId::new("saffron"),
                    quantity: 2,
                }
            )
            .unwrap_err(),
            LedgerError::CartOverflow
        );
        assert_eq!(state, before);
        assert_eq!(state.cart_total(), huge);
    }

    #[test]
    fn test_restore_drops_lines_that_overflow_the_total() {
        let huge = huge_price();
        let line = |id: &str, unit_price, quantity| CartLine {
            product_id: ProductId::new(id),
            name: id.to_owned(),
            unit_price,
            quantity,
        };
        let mut state = LedgerState::default();

        reduce(
            &mut state,
            LedgerAction::RestoreCart {
                lines: vec![
                    line("mint", Price::from_units(25), 2),
                    line("forged", huge, 2),
                    line("kale", Price::from_units(60), 1),
                ],
            },
        )
        .unwrap();

        let kept: Vec<_> = state.cart.iter().map(|l| l.product_id.as_str()).collect();
        assert_eq!(kept, ["mint", "kale"]);
        assert_eq!(state.cart_total(), Price::from_units(110));
    }

    fn huge_price() -> Price {
        serde_json::from_str("\"79228162514264337593543950335\"").unwrap()
    }

    #[test]
    fn test_zero_quantity_add_is_rejected() {
        let mut state = LedgerState::default();
        let basil = Product::new("basil", "Genovese Basil", Price::from_units(40));
        assert!(matches!(
            reduce(&mut state, LedgerAction::AddToCart { product: basil, quantity: 0 }),
            Err(LedgerError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn test_stock_moves_need_an_owner() {
        let mut state = LedgerState::default();
        assert_eq!(
            reduce(&mut state, list("p1", 1, 10)).unwrap_err(),
            LedgerError::NotSignedIn
        );
    }

    #[test]
    fn test_sale_shrinks_then_removes_listing() {
        let mut state = owned_state(&[("p1", 5)]);
        reduce(&mut state, list("p1", 5, 30)).unwrap();

        let sale = |quantity| LedgerAction::RecordListingSale {
            product_id: ProductId::new("p1"),
            quantity,
        };
        reduce(&mut state, sale(2)).unwrap();
        assert_eq!(state.listing_quantity(&ProductId::new("p1")), 3);

        assert!(matches!(
            reduce(&mut state, sale(4)),
            Err(LedgerError::InsufficientStock { available: 3, .. })
        ));

        let ops = reduce(&mut state, sale(3)).unwrap();
        assert!(state.listings.is_empty());
        assert!(matches!(ops[..], [SyncOp::RemoveListing { .. }]));
        assert_eq!(state.inventory_quantity(&ProductId::new("p1")), 0);
    }

    #[test]
    fn test_reserve_rejects_overdraw() {
        let mut state = owned_state(&[("p1", 2)]);
        assert!(matches!(
            reduce(
                &mut state,
                LedgerAction::ReserveStock {
                    product_id: ProductId::new("p1"),
                    quantity: 3,
                }
            ),
            Err(LedgerError::InsufficientStock { available: 2, requested: 3, .. })
        ));
        reduce(
            &mut state,
            LedgerAction::ReserveStock {
                product_id: ProductId::new("p1"),
                quantity: 2,
            },
        )
        .unwrap();
        assert_eq!(state.inventory_quantity(&ProductId::new("p1")), 0);
    }

    #[test]
    fn test_load_user_data_keeps_only_active_listings() {
        let mut state = owned_state(&[("stale", 99)]);
        let listing = |product: &str, status| ListingEntry {
            user_id: UserId::new("u1"),
            product_id: ProductId::new(product),
            quantity: 2,
            price: Price::from_units(10),
            status,
        };

        reduce(
            &mut state,
            LedgerAction::LoadUserData {
                inventory: vec![InventoryEntry {
                    user_id: UserId::new("u1"),
                    product_id: ProductId::new("p1"),
                    quantity: 4,
                }],
                listings: vec![
                    listing("p1", ListingStatus::Active),
                    listing("p2", ListingStatus::Removed),
                ],
            },
        )
        .unwrap();

        assert_eq!(state.inventory_quantity(&ProductId::new("stale")), 0);
        assert_eq!(state.inventory_quantity(&ProductId::new("p1")), 4);
        assert_eq!(state.listing_quantity(&ProductId::new("p1")), 2);
        assert_eq!(state.listing_quantity(&ProductId::new("p2")), 0);
    }

    #[test]
    fn test_checkout_credits_inventory_and_empties_cart() {
        let mut state = owned_state(&[("basil", 1)]);
        let basil = Product::new("basil", "Genovese Basil", Price::from_units(40));
        reduce(&mut state, LedgerAction::AddToCart { product: basil, quantity: 3 }).unwrap();

        reduce(
            &mut state,
            LedgerAction::CompleteCheckout {
                lines: vec![(ProductId::new("basil"), 3)],
            },
        )
        .unwrap();

        assert!(state.cart.is_empty());
        assert_eq!(state.inventory_quantity(&ProductId::new("basil")), 4);
        assert_eq!(
            reduce(&mut state, LedgerAction::CompleteCheckout { lines: vec![] }).unwrap_err(),
            LedgerError::EmptyCart
        );
    }
}
