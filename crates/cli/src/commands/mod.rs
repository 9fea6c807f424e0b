//! CLI command implementations.

pub mod marketplace;
pub mod orders;
pub mod sessions;
