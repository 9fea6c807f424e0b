//! Checkout orders.
//!
//! The cart becomes a validated [`OrderDraft`]; the remote service stores it
//! as an [`Order`] with one [`OrderItem`] per line. Payment is handled
//! elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aztec_core::{OrderId, OrderStatus, Price, ProductId, UserId};

use super::CartLine;

/// Default destination country.
pub const DEFAULT_COUNTRY: &str = "India";

/// Shipping address captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub full_name: String,
    pub phone: String,
    pub address_line_1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line_2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl Default for ShippingAddress {
    fn default() -> Self {
        Self {
            full_name: String::new(),
            phone: String::new(),
            address_line_1: String::new(),
            address_line_2: None,
            city: String::new(),
            state: String::new(),
            postal_code: String::new(),
            country: DEFAULT_COUNTRY.to_owned(),
        }
    }
}

impl ShippingAddress {
    /// Names of required fields that are blank, in form order.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("full_name", &self.full_name),
            ("phone", &self.phone),
            ("address_line_1", &self.address_line_1),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// One line of an order draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: Price,
}

impl From<&CartLine> for OrderLine {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product_id.clone(),
            quantity: line.quantity,
            price: line.unit_price,
        }
    }
}

/// An order ready to be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub user_id: UserId,
    pub total_amount: Price,
    pub status: OrderStatus,
    pub shipping_address: ShippingAddress,
    pub lines: Vec<OrderLine>,
}

/// A stored order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price at the time of purchase.
    pub price: Price,
}

/// A placed order, as read back for the order history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub total_amount: Price,
    pub status: OrderStatus,
    pub shipping_address: ShippingAddress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |count, item| count.saturating_add(item.quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_address_lists_all_required_fields() {
        let address = ShippingAddress::default();
        assert_eq!(
            address.missing_fields(),
            ["full_name", "phone", "address_line_1", "city", "state", "postal_code"]
        );
        assert_eq!(address.country, "India");
    }

    #[test]
    fn test_whitespace_counts_as_missing() {
        let address = ShippingAddress {
            full_name: "Asha Rao".into(),
            phone: "  ".into(),
            address_line_1: "12 Greenhouse Rd".into(),
            city: "Pune".into(),
            state: "MH".into(),
            postal_code: "411001".into(),
            ..ShippingAddress::default()
        };
        assert_eq!(address.missing_fields(), ["phone"]);
    }
}
