//! Ledger entry types.
//!
//! Three collections track units of a product: the purchase cart, the
//! personal inventory, and the active marketplace listings.

use serde::{Deserialize, Serialize};

use aztec_core::{ListingStatus, Price, ProductId, UserId};

use super::Product;

/// Units of a product a user holds and has not offered for sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Units a user has publicly offered for sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: Price,
    #[serde(default)]
    pub status: ListingStatus,
}

impl ListingEntry {
    /// Whether the listing is currently on offer.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }
}

/// Units a user intends to buy.
///
/// Name and unit price are snapshotted when the line is first added so the
/// cart can be totalled and shown without the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Price,
    pub quantity: u32,
}

impl CartLine {
    /// New line for `quantity` units of `product`.
    #[must_use]
    pub fn new(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id.clone(),
            name: product.name.clone(),
            unit_price: product.price,
            quantity,
        }
    }

    /// Line subtotal.
    #[must_use]
    pub fn subtotal(&self) -> Price {
        self.unit_price.times(self.quantity)
    }

    /// Line subtotal, or `None` if it overflows.
    #[must_use]
    pub fn checked_subtotal(&self) -> Option<Price> {
        self.unit_price.checked_times(self.quantity)
    }
}
