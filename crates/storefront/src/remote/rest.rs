//! HTTP client for the hosted data/auth service.
//!
//! Talks to a PostgREST-style backend: credential endpoints under
//! `/auth/v1/` and table endpoints under `/rest/v1/<table>`. Every request
//! carries the project's anon key; user-scoped auth calls additionally carry
//! the access token returned by the last sign-in.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use aztec_core::{
    Email, ListingStatus, OrderId, OrderStatus, Price, ProductId, SessionToken, UserId,
};

use super::{AuthGrant, RemoteError, RemoteService, SessionGrant, SessionTarget};
use crate::config::RemoteConfig;
use crate::models::{
    DeviceInfo, InventoryEntry, ListingEntry, NewProfile, Order, OrderDraft, OrderItem, Session,
    ShippingAddress, User,
};

const PROFILES: &str = "user_profiles";
const INVENTORY: &str = "user_inventory";
const LISTINGS: &str = "marketplace_listings";
const ORDERS: &str = "orders";
const ORDER_ITEMS: &str = "order_items";
const SESSIONS: &str = "auth_sessions";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST implementation of [`RemoteService`].
#[derive(Clone)]
pub struct RestRemote {
    client: reqwest::Client,
    base_url: Url,
    anon_key: SecretString,
    access_token: Arc<Mutex<Option<SecretString>>>,
}

impl std::fmt::Debug for RestRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRemote")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl RestRemote {
    /// Create a client for the configured service.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Rejected` if the anon key cannot be used as a
    /// header value, or `Unavailable` if the HTTP client fails to build.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();

        let key = HeaderValue::from_str(config.anon_key.expose_secret())
            .map_err(|e| RemoteError::Rejected(format!("invalid anon key: {e}")))?;
        headers.insert("apikey", key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        // `join` drops the last path segment unless the base ends with '/'.
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            anon_key: config.anon_key.clone(),
            access_token: Arc::new(Mutex::new(None)),
        })
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, RemoteError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| RemoteError::Rejected(format!("invalid path {path}: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn table(&self, table: &str, query: &[(&str, String)]) -> Result<Url, RemoteError> {
        self.url(&format!("rest/v1/{table}"), query)
    }

    fn bearer(&self) -> String {
        let token = self
            .access_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| t.expose_secret().to_owned());
        format!(
            "Bearer {}",
            token.as_deref().unwrap_or_else(|| self.anon_key.expose_secret())
        )
    }

    fn remember_access_token(&self, token: Option<String>) {
        *self
            .access_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.map(SecretString::from);
    }

    async fn select<T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, RemoteError> {
        let url = self.table(table, query)?;
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn insert<T: Serialize + Sync + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        rows: &T,
    ) -> Result<Vec<R>, RemoteError> {
        let url = self.table(table, &[])?;
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.bearer())
            .header("Prefer", "return=representation")
            .json(rows)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn upsert<T: Serialize + Sync>(
        &self,
        table: &str,
        conflict_columns: &str,
        row: &T,
    ) -> Result<(), RemoteError> {
        let url = self.table(table, &[("on_conflict", conflict_columns.to_owned())])?;
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.bearer())
            .header("Prefer", "resolution=merge-duplicates")
            .json(row)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_order(&self, order_id: &OrderId) -> Result<(), RemoteError> {
        let url = self.table(ORDERS, &[("id", eq(order_id.as_str()))])?;
        let response = self
            .client
            .delete(url)
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

/// Map a non-success status into the error taxonomy.
async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), %message, "remote request failed");
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::CONFLICT => RemoteError::Conflict(message),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::Unavailable(message),
        s if s.is_server_error() => RemoteError::Unavailable(message),
        _ => RemoteError::Rejected(message),
    })
}

// =============================================================================
// Wire rows
// =============================================================================

#[derive(Serialize)]
struct PasswordCredentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
}

/// Response of the token and signup endpoints.
#[derive(Deserialize)]
struct AuthResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<AuthUser>,
    /// Signup without auto-confirm returns the bare user object.
    #[serde(default)]
    id: Option<String>,
}

impl AuthResponse {
    fn into_grant(self) -> Result<(AuthGrant, Option<String>), RemoteError> {
        let id = self
            .user
            .map(|u| u.id)
            .or(self.id)
            .ok_or_else(|| RemoteError::Decode("auth response without user id".to_owned()))?;
        Ok((
            AuthGrant {
                user_id: UserId::new(id),
            },
            self.access_token,
        ))
    }
}

#[derive(Serialize, Deserialize)]
struct ProfileRow {
    id: String,
    email: String,
    username: String,
    #[serde(default)]
    contact: String,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for User {
    type Error = RemoteError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email)
            .map_err(|e| RemoteError::Decode(format!("profile {}: {e}", row.id)))?;
        Ok(Self {
            id: UserId::new(row.id),
            email,
            username: row.username,
            contact: row.contact,
            created_at: row.created_at,
        })
    }
}

#[derive(Serialize)]
struct NewProfileRow<'a> {
    id: &'a str,
    email: &'a str,
    username: &'a str,
    contact: &'a str,
}

#[derive(Serialize, Deserialize)]
struct InventoryRow {
    user_id: String,
    product_id: String,
    quantity: u32,
}

impl From<InventoryRow> for InventoryEntry {
    fn from(row: InventoryRow) -> Self {
        Self {
            user_id: UserId::new(row.user_id),
            product_id: ProductId::new(row.product_id),
            quantity: row.quantity,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ListingRow {
    user_id: String,
    product_id: String,
    quantity: u32,
    price: Price,
    status: ListingStatus,
}

impl From<ListingRow> for ListingEntry {
    fn from(row: ListingRow) -> Self {
        Self {
            user_id: UserId::new(row.user_id),
            product_id: ProductId::new(row.product_id),
            quantity: row.quantity,
            price: row.price,
            status: row.status,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SessionRow {
    session_token: String,
    user_id: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    remember_me: bool,
    device_info: DeviceInfo,
    last_activity_at: DateTime<Utc>,
}

impl From<&Session> for SessionRow {
    fn from(session: &Session) -> Self {
        Self {
            session_token: session.token.expose().to_owned(),
            user_id: session.user_id.as_str().to_owned(),
            issued_at: session.issued_at,
            expires_at: session.expires_at,
            remember_me: session.remember,
            device_info: session.device.clone(),
            last_activity_at: session.last_activity_at,
        }
    }
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            token: SessionToken::from_raw(row.session_token),
            user_id: UserId::new(row.user_id),
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            remember: row.remember_me,
            device: row.device_info,
            last_activity_at: row.last_activity_at,
        }
    }
}

#[derive(Serialize)]
struct NewOrderRow<'a> {
    user_id: &'a str,
    total_amount: Price,
    status: OrderStatus,
    shipping_address: &'a ShippingAddress,
}

#[derive(Serialize, Deserialize)]
struct OrderItemRow {
    order_id: String,
    product_id: String,
    quantity: u32,
    price: Price,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            order_id: OrderId::new(row.order_id),
            product_id: ProductId::new(row.product_id),
            quantity: row.quantity,
            price: row.price,
        }
    }
}

/// An `orders` row, optionally embedding its `order_items`.
#[derive(Deserialize)]
struct OrderRow {
    id: String,
    user_id: String,
    total_amount: Price,
    status: OrderStatus,
    shipping_address: ShippingAddress,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    order_items: Vec<OrderItemRow>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: OrderId::new(row.id),
            user_id: UserId::new(row.user_id),
            total_amount: row.total_amount,
            status: row.status,
            shipping_address: row.shipping_address,
            created_at: row.created_at,
            updated_at: row.updated_at.unwrap_or(row.created_at),
            items: row.order_items.into_iter().map(OrderItem::from).collect(),
        }
    }
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl RemoteService for RestRemote {
    #[instrument(skip(self, password), fields(email = %email))]
    async fn authenticate(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<AuthGrant, RemoteError> {
        let url = self.url("auth/v1/token", &[("grant_type", "password".to_owned())])?;
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.anon_key.expose_secret()))
            .json(&PasswordCredentials {
                email: email.as_str(),
                password: password.expose_secret(),
            })
            .send()
            .await?;

        // The token endpoint answers 400 for bad credentials.
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(RemoteError::Unauthorized(
                "invalid login credentials".to_owned(),
            ));
        }
        let body: AuthResponse = check(response).await?.json().await?;
        let (grant, access_token) = body.into_grant()?;
        self.remember_access_token(access_token);
        Ok(grant)
    }

    #[instrument(skip(self, password), fields(email = %email))]
    async fn create_account(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<AuthGrant, RemoteError> {
        let url = self.url("auth/v1/signup", &[])?;
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.anon_key.expose_secret()))
            .json(&PasswordCredentials {
                email: email.as_str(),
                password: password.expose_secret(),
            })
            .send()
            .await?;

        let body: AuthResponse = match check(response).await {
            Ok(response) => response.json().await?,
            Err(RemoteError::Rejected(message)) if message.contains("already registered") => {
                return Err(RemoteError::Conflict(message));
            }
            Err(e) => return Err(e),
        };
        let (grant, access_token) = body.into_grant()?;
        self.remember_access_token(access_token);
        Ok(grant)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn delete_account(&self, user_id: &UserId) -> Result<(), RemoteError> {
        let url = self.url(&format!("auth/v1/admin/users/{user_id}"), &[])?;
        let response = self
            .client
            .delete(url)
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn revoke_credential(&self, user_id: &UserId) -> Result<(), RemoteError> {
        let url = self.url("auth/v1/logout", &[])?;
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;
        self.remember_access_token(None);
        check(response).await?;
        Ok(())
    }

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<User>, RemoteError> {
        let rows: Vec<ProfileRow> = self
            .select(PROFILES, &[("id", eq(user_id.as_str())), ("select", "*".to_owned())])
            .await?;
        rows.into_iter().next().map(User::try_from).transpose()
    }

    #[instrument(skip(self, profile), fields(user_id = %profile.id))]
    async fn create_profile(&self, profile: &NewProfile) -> Result<User, RemoteError> {
        let url = self.table(PROFILES, &[])?;
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.bearer())
            .header("Prefer", "return=representation")
            .json(&NewProfileRow {
                id: profile.id.as_str(),
                email: profile.email.as_str(),
                username: &profile.username,
                contact: &profile.contact,
            })
            .send()
            .await?;
        let rows: Vec<ProfileRow> = check(response).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::Decode("profile insert returned no row".to_owned()))
            .and_then(User::try_from)
    }

    async fn get_inventory(&self, user_id: &UserId) -> Result<Vec<InventoryEntry>, RemoteError> {
        let rows: Vec<InventoryRow> = self
            .select(INVENTORY, &[("user_id", eq(user_id.as_str()))])
            .await?;
        Ok(rows.into_iter().map(InventoryEntry::from).collect())
    }

    async fn upsert_inventory(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(), RemoteError> {
        self.upsert(
            INVENTORY,
            "user_id,product_id",
            &InventoryRow {
                user_id: user_id.as_str().to_owned(),
                product_id: product_id.as_str().to_owned(),
                quantity,
            },
        )
        .await
    }

    async fn get_listings(&self, user_id: &UserId) -> Result<Vec<ListingEntry>, RemoteError> {
        let rows: Vec<ListingRow> = self
            .select(LISTINGS, &[("user_id", eq(user_id.as_str()))])
            .await?;
        Ok(rows.into_iter().map(ListingEntry::from).collect())
    }

    async fn get_all_active_listings(&self) -> Result<Vec<ListingEntry>, RemoteError> {
        let rows: Vec<ListingRow> = self
            .select(LISTINGS, &[("status", eq(&ListingStatus::Active.to_string()))])
            .await?;
        Ok(rows.into_iter().map(ListingEntry::from).collect())
    }

    async fn upsert_listing(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: u32,
        price: Price,
    ) -> Result<(), RemoteError> {
        self.upsert(
            LISTINGS,
            "user_id,product_id",
            &ListingRow {
                user_id: user_id.as_str().to_owned(),
                product_id: product_id.as_str().to_owned(),
                quantity,
                price,
                status: ListingStatus::Active,
            },
        )
        .await
    }

    async fn remove_listing(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<(), RemoteError> {
        let url = self.table(
            LISTINGS,
            &[
                ("user_id", eq(user_id.as_str())),
                ("product_id", eq(product_id.as_str())),
            ],
        )?;
        let response = self
            .client
            .patch(url)
            .header(AUTHORIZATION, self.bearer())
            .json(&serde_json::json!({
                "status": ListingStatus::Removed,
                "quantity": 0,
            }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, draft), fields(user_id = %draft.user_id))]
    async fn create_order(&self, draft: &OrderDraft) -> Result<Order, RemoteError> {
        let rows: Vec<OrderRow> = self
            .insert(
                ORDERS,
                &NewOrderRow {
                    user_id: draft.user_id.as_str(),
                    total_amount: draft.total_amount,
                    status: draft.status,
                    shipping_address: &draft.shipping_address,
                },
            )
            .await?;
        let mut order = rows
            .into_iter()
            .next()
            .map(Order::from)
            .ok_or_else(|| RemoteError::Decode("order insert returned no row".to_owned()))?;

        let items: Vec<OrderItemRow> = draft
            .lines
            .iter()
            .map(|line| OrderItemRow {
                order_id: order.id.as_str().to_owned(),
                product_id: line.product_id.as_str().to_owned(),
                quantity: line.quantity,
                price: line.price,
            })
            .collect();
        match self.insert::<_, OrderItemRow>(ORDER_ITEMS, items.as_slice()).await {
            Ok(stored) => {
                order.items = stored.into_iter().map(OrderItem::from).collect();
                Ok(order)
            }
            Err(e) => {
                // Don't leave an order without items behind.
                if let Err(rollback) = self.delete_order(&order.id).await {
                    warn!(order_id = %order.id, error = %rollback, "Order rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn get_orders(&self, user_id: &UserId) -> Result<Vec<Order>, RemoteError> {
        let rows: Vec<OrderRow> = self
            .select(
                ORDERS,
                &[
                    ("select", "*,order_items(*)".to_owned()),
                    ("user_id", eq(user_id.as_str())),
                    ("order", "created_at.desc".to_owned()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Order::from).collect())
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    async fn create_session_record(&self, session: &Session) -> Result<(), RemoteError> {
        let url = self.table(SESSIONS, &[])?;
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.bearer())
            .json(&SessionRow::from(session))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn validate_session_record(
        &self,
        token: &SessionToken,
    ) -> Result<Option<SessionGrant>, RemoteError> {
        let rows: Vec<SessionRow> = self
            .select(SESSIONS, &[("session_token", eq(token.expose()))])
            .await?;
        let Some(session) = rows.into_iter().next().map(Session::from) else {
            return Ok(None);
        };
        let user = self.get_profile(&session.user_id).await?;
        Ok(user.map(|user| SessionGrant { session, user }))
    }

    async fn touch_session_record(
        &self,
        token: &SessionToken,
        at: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        let url = self.table(SESSIONS, &[("session_token", eq(token.expose()))])?;
        let response = self
            .client
            .patch(url)
            .header(AUTHORIZATION, self.bearer())
            .json(&serde_json::json!({ "last_activity_at": at }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_session_record(&self, target: &SessionTarget) -> Result<(), RemoteError> {
        let filter = match target {
            SessionTarget::Token(token) => ("session_token", eq(token.expose())),
            SessionTarget::User(user_id) => ("user_id", eq(user_id.as_str())),
        };
        let url = self.table(SESSIONS, &[filter])?;
        let response = self
            .client
            .delete(url)
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RemoteError> {
        let url = self.table(
            SESSIONS,
            &[
                ("expires_at", format!("lt.{}", now.to_rfc3339())),
                ("select", "session_token".to_owned()),
            ],
        )?;
        let response = self
            .client
            .delete(url)
            .header(AUTHORIZATION, self.bearer())
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let deleted: Vec<serde_json::Value> = check(response).await?.json().await?;
        Ok(u64::try_from(deleted.len()).unwrap_or(u64::MAX))
    }
}
