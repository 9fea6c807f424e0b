//! Ledger error types.

use thiserror::Error;

use aztec_core::ProductId;

use crate::remote::RemoteError;

/// Errors from ledger operations.
///
/// Every variant except `Remote` is raised before any state is touched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Not enough unlisted inventory for the requested move.
    #[error("insufficient stock for {product_id}: {available} available, {requested} requested")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// No active listing exists for the product.
    #[error("no active listing for {0}")]
    NoActiveListing(ProductId),

    /// A quantity argument was zero or out of range.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A listing price was zero.
    #[error("invalid price: {0}")]
    InvalidPrice(String),

    /// The cart total would exceed what a price can represent.
    #[error("cart total too large")]
    CartOverflow,

    /// The operation needs a signed-in user.
    #[error("sign in to manage inventory and listings")]
    NotSignedIn,

    /// Checkout was attempted with an empty cart.
    #[error("cart is empty")]
    EmptyCart,

    /// Required shipping fields are blank.
    #[error("missing shipping fields: {}", .0.join(", "))]
    MissingShippingFields(Vec<&'static str>),

    /// A remote fetch or order placement failed.
    #[error("remote request failed: {0}")]
    Remote(#[from] RemoteError),
}
