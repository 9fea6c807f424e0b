//! Aztec Harvest storefront core.
//!
//! Session lifecycle (persistence, expiry, idle and unload logout,
//! remember-me) and the three commerce ledgers (personal inventory, active
//! listings, purchase cart) behind a pluggable remote service.
//!
//! # Modules
//!
//! - [`state`] - `Storefront` wiring of all services
//! - [`services`] - Session store, auth controller, ledger engine, sync queue
//! - [`remote`] - Remote data/auth service seam with REST and in-memory backends
//! - [`storage`] - Durable and tab-scoped key/value storage
//! - [`events`] - Session lifecycle observers

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod storage;

pub use state::Storefront;
