//! Domain models for the storefront core.
//!
//! These are the validated shapes the services pass around. Rows coming from
//! the remote service are converted into them at the `remote` boundary.

pub mod ledger;
pub mod order;
pub mod product;
pub mod session;
pub mod user;

pub use ledger::{CartLine, InventoryEntry, ListingEntry};
pub use order::{Order, OrderDraft, OrderItem, OrderLine, ShippingAddress};
pub use product::Product;
pub use session::{DeviceInfo, Session};
pub use user::{NewProfile, User};
