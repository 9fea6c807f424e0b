//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `session` - Session records, local token storage and visibility hints
//! - `auth` - Sign-up, sign-in, sign-out and startup restore
//! - `ledger` - Cart, inventory and marketplace listings
//! - `sync` - Ordered background reconciliation of ledger writes

pub mod auth;
pub mod ledger;
pub mod session;
pub mod sync;
