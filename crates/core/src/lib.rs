//! Aztec Harvest Core - Shared types library.
//!
//! This crate provides common types used across all storefront components:
//! - `storefront` - Session lifecycle, auth controller and commerce ledgers
//! - `cli` - Command-line maintenance tools
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no storage access, no HTTP
//! clients. This keeps it lightweight and allows it to be used anywhere,
//! including from the presentation layer.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, prices, emails, tokens and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
