//! In-process remote service.
//!
//! Behaves like the hosted service (unique accounts, last-writer-wins rows,
//! session table) and adds knobs for failure injection and latency so the
//! services' degraded paths can be exercised deterministically.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use aztec_core::{Email, ListingStatus, OrderId, Price, ProductId, SessionToken, UserId};

use super::{AuthGrant, RemoteError, RemoteService, SessionGrant, SessionTarget};
use crate::models::{
    InventoryEntry, ListingEntry, NewProfile, Order, OrderDraft, OrderItem, Session, User,
};

/// Remote calls, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Authenticate,
    CreateAccount,
    DeleteAccount,
    RevokeCredential,
    GetProfile,
    CreateProfile,
    GetInventory,
    UpsertInventory,
    GetListings,
    GetAllActiveListings,
    UpsertListing,
    RemoveListing,
    CreateOrder,
    GetOrders,
    CreateSession,
    ValidateSession,
    TouchSession,
    DeleteSession,
    SweepSessions,
}

struct Account {
    user_id: UserId,
    password: SecretString,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Email, Account>,
    signed_in: HashSet<UserId>,
    profiles: HashMap<UserId, User>,
    inventory: BTreeMap<(UserId, ProductId), u32>,
    listings: BTreeMap<(UserId, ProductId), ListingEntry>,
    orders: Vec<Order>,
    sessions: HashMap<SessionToken, Session>,
    offline: bool,
    latency: Duration,
    pending_failures: HashMap<RemoteOp, u32>,
    pending_rejections: HashMap<RemoteOp, u32>,
    calls: HashMap<RemoteOp, usize>,
}

/// In-memory [`RemoteService`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote").finish_non_exhaustive()
    }
}

impl MemoryRemote {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call, apply injected failures, then wait out the latency.
    async fn enter(&self, op: RemoteOp) -> Result<(), RemoteError> {
        let (latency, outcome) = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            let outcome = if state.offline {
                Err(RemoteError::Unavailable("remote offline".to_owned()))
            } else if let Some(left) = state.pending_failures.get_mut(&op).filter(|n| **n > 0) {
                *left -= 1;
                Err(RemoteError::Unavailable(format!("injected failure for {op:?}")))
            } else if let Some(left) = state.pending_rejections.get_mut(&op).filter(|n| **n > 0) {
                *left -= 1;
                Err(RemoteError::Rejected(format!("injected rejection for {op:?}")))
            } else {
                Ok(())
            };
            (state.latency, outcome)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        outcome
    }

    // =========================================================================
    // Knobs
    // =========================================================================

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fail the next `times` calls of `op` with `Unavailable`.
    pub fn fail_next(&self, op: RemoteOp, times: u32) {
        self.lock().pending_failures.insert(op, times);
    }

    /// Reject the next `times` calls of `op` with the permanent `Rejected`.
    pub fn reject_next(&self, op: RemoteOp, times: u32) {
        self.lock().pending_rejections.insert(op, times);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// How many times `op` was called.
    #[must_use]
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Create an account and its profile.
    pub fn register(&self, email: &Email, password: &str, username: &str) -> User {
        let user_id = self.register_without_profile(email, password);
        let user = User {
            id: user_id.clone(),
            email: email.clone(),
            username: username.to_owned(),
            contact: String::new(),
            created_at: Utc::now(),
        };
        self.lock().profiles.insert(user_id, user.clone());
        user
    }

    /// Create an account with no profile row.
    pub fn register_without_profile(&self, email: &Email, password: &str) -> UserId {
        let user_id = UserId::new(Uuid::new_v4().to_string());
        self.lock().accounts.insert(
            email.clone(),
            Account {
                user_id: user_id.clone(),
                password: SecretString::from(password.to_owned()),
            },
        );
        user_id
    }

    /// Set a user's inventory row.
    pub fn seed_inventory(&self, user_id: &UserId, product_id: &ProductId, quantity: u32) {
        self.lock()
            .inventory
            .insert((user_id.clone(), product_id.clone()), quantity);
    }

    /// Insert a listing row.
    pub fn seed_listing(&self, listing: ListingEntry) {
        self.lock().listings.insert(
            (listing.user_id.clone(), listing.product_id.clone()),
            listing,
        );
    }

    /// Insert a session row directly.
    pub fn seed_session(&self, session: Session) {
        self.lock().sessions.insert(session.token.clone(), session);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Stored inventory quantity (0 when absent).
    #[must_use]
    pub fn inventory_quantity(&self, user_id: &UserId, product_id: &ProductId) -> u32 {
        self.lock()
            .inventory
            .get(&(user_id.clone(), product_id.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Stored listing row.
    #[must_use]
    pub fn listing(&self, user_id: &UserId, product_id: &ProductId) -> Option<ListingEntry> {
        self.lock()
            .listings
            .get(&(user_id.clone(), product_id.clone()))
            .cloned()
    }

    /// Every stored order of `user_id`, oldest first.
    #[must_use]
    pub fn orders_of(&self, user_id: &UserId) -> Vec<Order> {
        self.lock()
            .orders
            .iter()
            .filter(|o| &o.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Whether an account exists for `email`.
    #[must_use]
    pub fn has_account(&self, email: &Email) -> bool {
        self.lock().accounts.contains_key(email)
    }

    /// Whether a profile exists for `user_id`.
    #[must_use]
    pub fn has_profile(&self, user_id: &UserId) -> bool {
        self.lock().profiles.contains_key(user_id)
    }

    /// Whether the credential of `user_id` is currently signed in.
    #[must_use]
    pub fn is_signed_in(&self, user_id: &UserId) -> bool {
        self.lock().signed_in.contains(user_id)
    }

    /// Number of stored session rows.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Stored session row for `token`.
    #[must_use]
    pub fn session(&self, token: &SessionToken) -> Option<Session> {
        self.lock().sessions.get(token).cloned()
    }
}

#[async_trait]
impl RemoteService for MemoryRemote {
    async fn authenticate(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<AuthGrant, RemoteError> {
        self.enter(RemoteOp::Authenticate).await?;
        let mut state = self.lock();
        let user_id = state
            .accounts
            .get(email)
            .filter(|a| a.password.expose_secret() == password.expose_secret())
            .map(|a| a.user_id.clone())
            .ok_or_else(|| RemoteError::Unauthorized("invalid login credentials".to_owned()))?;
        state.signed_in.insert(user_id.clone());
        Ok(AuthGrant { user_id })
    }

    async fn create_account(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<AuthGrant, RemoteError> {
        self.enter(RemoteOp::CreateAccount).await?;
        let mut state = self.lock();
        if state.accounts.contains_key(email) {
            return Err(RemoteError::Conflict("user already registered".to_owned()));
        }
        let user_id = UserId::new(Uuid::new_v4().to_string());
        state.accounts.insert(
            email.clone(),
            Account {
                user_id: user_id.clone(),
                password: password.clone(),
            },
        );
        state.signed_in.insert(user_id.clone());
        Ok(AuthGrant { user_id })
    }

    async fn delete_account(&self, user_id: &UserId) -> Result<(), RemoteError> {
        self.enter(RemoteOp::DeleteAccount).await?;
        let mut state = self.lock();
        state.accounts.retain(|_, a| &a.user_id != user_id);
        state.signed_in.remove(user_id);
        Ok(())
    }

    async fn revoke_credential(&self, user_id: &UserId) -> Result<(), RemoteError> {
        self.enter(RemoteOp::RevokeCredential).await?;
        self.lock().signed_in.remove(user_id);
        Ok(())
    }

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<User>, RemoteError> {
        self.enter(RemoteOp::GetProfile).await?;
        Ok(self.lock().profiles.get(user_id).cloned())
    }

    async fn create_profile(&self, profile: &NewProfile) -> Result<User, RemoteError> {
        self.enter(RemoteOp::CreateProfile).await?;
        let mut state = self.lock();
        if state.profiles.contains_key(&profile.id) {
            return Err(RemoteError::Conflict("profile already exists".to_owned()));
        }
        let user = User {
            id: profile.id.clone(),
            email: profile.email.clone(),
            username: profile.username.clone(),
            contact: profile.contact.clone(),
            created_at: Utc::now(),
        };
        state.profiles.insert(profile.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_inventory(&self, user_id: &UserId) -> Result<Vec<InventoryEntry>, RemoteError> {
        self.enter(RemoteOp::GetInventory).await?;
        Ok(self
            .lock()
            .inventory
            .iter()
            .filter(|((owner, _), _)| owner == user_id)
            .map(|((owner, product_id), quantity)| InventoryEntry {
                user_id: owner.clone(),
                product_id: product_id.clone(),
                quantity: *quantity,
            })
            .collect())
    }

    async fn upsert_inventory(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(), RemoteError> {
        self.enter(RemoteOp::UpsertInventory).await?;
        let key = (user_id.clone(), product_id.clone());
        let mut state = self.lock();
        if quantity == 0 {
            state.inventory.remove(&key);
        } else {
            state.inventory.insert(key, quantity);
        }
        Ok(())
    }

    async fn get_listings(&self, user_id: &UserId) -> Result<Vec<ListingEntry>, RemoteError> {
        self.enter(RemoteOp::GetListings).await?;
        Ok(self
            .lock()
            .listings
            .values()
            .filter(|l| &l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_all_active_listings(&self) -> Result<Vec<ListingEntry>, RemoteError> {
        self.enter(RemoteOp::GetAllActiveListings).await?;
        Ok(self
            .lock()
            .listings
            .values()
            .filter(|l| l.is_active())
            .cloned()
            .collect())
    }

    async fn upsert_listing(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: u32,
        price: Price,
    ) -> Result<(), RemoteError> {
        self.enter(RemoteOp::UpsertListing).await?;
        self.lock().listings.insert(
            (user_id.clone(), product_id.clone()),
            ListingEntry {
                user_id: user_id.clone(),
                product_id: product_id.clone(),
                quantity,
                price,
                status: ListingStatus::Active,
            },
        );
        Ok(())
    }

    async fn remove_listing(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<(), RemoteError> {
        self.enter(RemoteOp::RemoveListing).await?;
        if let Some(listing) = self
            .lock()
            .listings
            .get_mut(&(user_id.clone(), product_id.clone()))
        {
            listing.status = ListingStatus::Removed;
            listing.quantity = 0;
        }
        Ok(())
    }

    async fn create_order(&self, draft: &OrderDraft) -> Result<Order, RemoteError> {
        self.enter(RemoteOp::CreateOrder).await?;
        if draft.lines.is_empty() {
            return Err(RemoteError::Rejected("order has no items".to_owned()));
        }
        let id = OrderId::new(Uuid::new_v4().to_string());
        let now = Utc::now();
        let order = Order {
            id: id.clone(),
            user_id: draft.user_id.clone(),
            total_amount: draft.total_amount,
            status: draft.status,
            shipping_address: draft.shipping_address.clone(),
            created_at: now,
            updated_at: now,
            items: draft
                .lines
                .iter()
                .map(|line| OrderItem {
                    order_id: id.clone(),
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    price: line.price,
                })
                .collect(),
        };
        self.lock().orders.push(order.clone());
        Ok(order)
    }

    async fn get_orders(&self, user_id: &UserId) -> Result<Vec<Order>, RemoteError> {
        self.enter(RemoteOp::GetOrders).await?;
        // Insertion order breaks ties between equal timestamps.
        let mut orders = self.orders_of(user_id);
        orders.reverse();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn create_session_record(&self, session: &Session) -> Result<(), RemoteError> {
        self.enter(RemoteOp::CreateSession).await?;
        let mut state = self.lock();
        if state.sessions.contains_key(&session.token) {
            return Err(RemoteError::Conflict("session token already exists".to_owned()));
        }
        state.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn validate_session_record(
        &self,
        token: &SessionToken,
    ) -> Result<Option<SessionGrant>, RemoteError> {
        self.enter(RemoteOp::ValidateSession).await?;
        let state = self.lock();
        Ok(state.sessions.get(token).and_then(|session| {
            state.profiles.get(&session.user_id).map(|user| SessionGrant {
                session: session.clone(),
                user: user.clone(),
            })
        }))
    }

    async fn touch_session_record(
        &self,
        token: &SessionToken,
        at: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        self.enter(RemoteOp::TouchSession).await?;
        self.lock()
            .sessions
            .get_mut(token)
            .map(|s| s.last_activity_at = at)
            .ok_or_else(|| RemoteError::NotFound("session".to_owned()))
    }

    async fn delete_session_record(&self, target: &SessionTarget) -> Result<(), RemoteError> {
        self.enter(RemoteOp::DeleteSession).await?;
        let mut state = self.lock();
        match target {
            SessionTarget::Token(token) => {
                state.sessions.remove(token);
            }
            SessionTarget::User(user_id) => state.sessions.retain(|_, s| &s.user_id != user_id),
        }
        Ok(())
    }

    async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RemoteError> {
        self.enter(RemoteOp::SweepSessions).await?;
        let mut state = self.lock();
        let before = state.sessions.len();
        state.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok(u64::try_from(before - state.sessions.len()).unwrap_or(u64::MAX))
    }
}
