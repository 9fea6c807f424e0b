//! Remote data/auth service seam.
//!
//! The remote service stores profiles, credentials, sessions, ledgers and
//! orders. The core only talks to it through [`RemoteService`], so the
//! services can be driven by the in-memory [`MemoryRemote`] in tests and by
//! the HTTP [`RestRemote`] in production.
//!
//! Every call is a suspension point: callers must not assume it completed
//! before their next statement.

mod error;
pub mod memory;
pub mod rest;

pub use error::RemoteError;
pub use memory::MemoryRemote;
pub use rest::RestRemote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use aztec_core::{Email, Price, ProductId, SessionToken, UserId};

use crate::models::{
    InventoryEntry, ListingEntry, NewProfile, Order, OrderDraft, Session, User,
};

/// Result of a successful credential check or account creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub user_id: UserId,
}

/// A session row together with its owner's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub session: Session,
    pub user: User,
}

/// Which session rows to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// One session by token.
    Token(SessionToken),
    /// Every session of a user.
    User(UserId),
}

/// Operations the core needs from the remote service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    // =========================================================================
    // Credentials
    // =========================================================================

    /// Verify email/password credentials.
    async fn authenticate(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<AuthGrant, RemoteError>;

    /// Create a credential. Fails with `Conflict` for an existing email.
    async fn create_account(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<AuthGrant, RemoteError>;

    /// Delete a credential (sign-up rollback).
    async fn delete_account(&self, user_id: &UserId) -> Result<(), RemoteError>;

    /// Sign a credential out of the remote auth provider.
    async fn revoke_credential(&self, user_id: &UserId) -> Result<(), RemoteError>;

    // =========================================================================
    // Profiles
    // =========================================================================

    /// Fetch a profile. `Ok(None)` when no row exists.
    async fn get_profile(&self, user_id: &UserId) -> Result<Option<User>, RemoteError>;

    /// Insert a profile row.
    async fn create_profile(&self, profile: &NewProfile) -> Result<User, RemoteError>;

    // =========================================================================
    // Ledgers
    // =========================================================================

    /// Inventory rows of a user.
    async fn get_inventory(&self, user_id: &UserId) -> Result<Vec<InventoryEntry>, RemoteError>;

    /// Set the absolute inventory quantity of a product.
    async fn upsert_inventory(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(), RemoteError>;

    /// Listings of a user.
    async fn get_listings(&self, user_id: &UserId) -> Result<Vec<ListingEntry>, RemoteError>;

    /// Every active listing in the marketplace.
    async fn get_all_active_listings(&self) -> Result<Vec<ListingEntry>, RemoteError>;

    /// Set the absolute quantity and price of a listing, creating it if needed.
    async fn upsert_listing(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: u32,
        price: Price,
    ) -> Result<(), RemoteError>;

    /// Mark a listing removed.
    async fn remove_listing(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<(), RemoteError>;

    // =========================================================================
    // Orders
    // =========================================================================

    /// Store an order and its items. Returns the stored order.
    async fn create_order(&self, draft: &OrderDraft) -> Result<Order, RemoteError>;

    /// Orders of a user with their items, newest first.
    async fn get_orders(&self, user_id: &UserId) -> Result<Vec<Order>, RemoteError>;

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Persist a newly issued session.
    async fn create_session_record(&self, session: &Session) -> Result<(), RemoteError>;

    /// Look up a session and its owner. `Ok(None)` for unknown tokens.
    async fn validate_session_record(
        &self,
        token: &SessionToken,
    ) -> Result<Option<SessionGrant>, RemoteError>;

    /// Record activity on a session.
    async fn touch_session_record(
        &self,
        token: &SessionToken,
        at: DateTime<Utc>,
    ) -> Result<(), RemoteError>;

    /// Delete session rows.
    async fn delete_session_record(&self, target: &SessionTarget) -> Result<(), RemoteError>;

    /// Delete every session that expired before `now`; returns how many.
    async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RemoteError>;
}
