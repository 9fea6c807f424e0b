//! Remote reconciliation queue.
//!
//! Ledger mutations commit locally first and then enqueue the remote writes
//! that mirror them. The queue applies those writes in dispatch order with
//! exponential backoff. Every failure is broadcast as a [`SyncFailure`].
//! When the service is unreachable after the retries, the drain stops and
//! the operation stays at the head of the queue for the next drain. An
//! operation the service rejects outright is dropped and the drain moves on.
//!
//! Every operation carries absolute quantities, so replaying one after a
//! partial failure is idempotent.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use aztec_core::{Price, ProductId, UserId};

use crate::config::RetryPolicy;
use crate::remote::{RemoteError, RemoteService};

/// Capacity of the failure broadcast channel.
const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// A remote write mirroring a committed ledger change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    UpsertInventory {
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    },
    UpsertListing {
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
        price: Price,
    },
    RemoveListing {
        user_id: UserId,
        product_id: ProductId,
    },
}

impl SyncOp {
    /// Product the write touches.
    #[must_use]
    pub const fn product_id(&self) -> &ProductId {
        match self {
            Self::UpsertInventory { product_id, .. }
            | Self::UpsertListing { product_id, .. }
            | Self::RemoveListing { product_id, .. } => product_id,
        }
    }

    async fn apply(&self, remote: &dyn RemoteService) -> Result<(), RemoteError> {
        match self {
            Self::UpsertInventory {
                user_id,
                product_id,
                quantity,
            } => remote.upsert_inventory(user_id, product_id, *quantity).await,
            Self::UpsertListing {
                user_id,
                product_id,
                quantity,
                price,
            } => {
                remote
                    .upsert_listing(user_id, product_id, *quantity, *price)
                    .await
            }
            Self::RemoveListing {
                user_id,
                product_id,
            } => remote.remove_listing(user_id, product_id).await,
        }
    }
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpsertInventory {
                product_id,
                quantity,
                ..
            } => write!(f, "inventory {product_id} = {quantity}"),
            Self::UpsertListing {
                product_id,
                quantity,
                price,
                ..
            } => write!(f, "listing {product_id} = {quantity} @ {price}"),
            Self::RemoveListing { product_id, .. } => write!(f, "remove listing {product_id}"),
        }
    }
}

/// A remote write that could not be applied.
///
/// Local state is never rolled back; the UI may retry or re-sync.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("sync of {op} failed after {attempts} attempt(s): {error}")]
pub struct SyncFailure {
    pub op: SyncOp,
    pub attempts: u32,
    pub error: RemoteError,
}

/// FIFO queue of remote writes with retry.
pub struct SyncQueue {
    remote: Arc<dyn RemoteService>,
    policy: RetryPolicy,
    pending: Mutex<VecDeque<SyncOp>>,
    /// Bumped by `discard_pending` so an in-flight write is not requeued.
    generation: AtomicU64,
    /// Serializes drains so writes leave in dispatch order.
    draining: tokio::sync::Mutex<()>,
    wake: Arc<Notify>,
    failures: broadcast::Sender<SyncFailure>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncQueue")
            .field("policy", &self.policy)
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

impl SyncQueue {
    /// Create an idle queue.
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteService>, policy: RetryPolicy) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            remote,
            policy,
            pending: Mutex::new(VecDeque::new()),
            generation: AtomicU64::new(0),
            draining: tokio::sync::Mutex::new(()),
            wake: Arc::new(Notify::new()),
            failures,
            worker: Mutex::new(None),
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<SyncOp>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append writes in order and wake the worker.
    pub fn enqueue(&self, ops: impl IntoIterator<Item = SyncOp>) {
        let mut pending = self.pending();
        let before = pending.len();
        pending.extend(ops);
        let added = pending.len() - before;
        drop(pending);
        if added > 0 {
            debug!(added, "Queued remote writes");
            self.wake.notify_one();
        }
    }

    /// Writes not yet confirmed by the remote service.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    /// Receive failures as they happen.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncFailure> {
        self.failures.subscribe()
    }

    /// Drop every queued write. Returns how many were dropped.
    pub fn discard_pending(&self) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending();
        let dropped = pending.len();
        pending.clear();
        dropped
    }

    /// Apply queued writes in order until the queue is empty or a write
    /// fails after all retries.
    ///
    /// Returns the failures of this drain (at most one transient failure,
    /// which stays queued, plus any permanent rejections, which are dropped).
    #[instrument(skip(self))]
    pub async fn drain(&self) -> Vec<SyncFailure> {
        let _guard = self.draining.lock().await;
        let mut failures = Vec::new();

        loop {
            let generation = self.generation.load(Ordering::SeqCst);
            let Some(op) = self.pending().pop_front() else {
                break;
            };

            match self.apply_with_retry(&op).await {
                Ok(()) => debug!(%op, "Remote write applied"),
                Err((attempts, error)) => {
                    let transient = error.is_transient();
                    let failure = SyncFailure {
                        op: op.clone(),
                        attempts,
                        error,
                    };
                    error!(error = %failure, "Remote write failed");
                    let _ = self.failures.send(failure.clone());
                    failures.push(failure);

                    if transient {
                        if self.generation.load(Ordering::SeqCst) == generation {
                            self.pending().push_front(op);
                        }
                        break;
                    }
                }
            }
        }

        failures
    }

    async fn apply_with_retry(&self, op: &SyncOp) -> Result<(), (u32, RemoteError)> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op.apply(self.remote.as_ref()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.jittered(self.policy.delay_after(attempt));
                    warn!(%op, attempt, delay_ms = delay.as_millis(), error = %e, "Retrying remote write");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }

    /// Add up to 10% random jitter.
    fn jittered(&self, delay: Duration) -> Duration {
        let max_jitter = u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX);
        if max_jitter == 0 {
            return delay;
        }
        let jitter = rand::rng().random_range(0..=max_jitter);
        (delay + Duration::from_millis(jitter)).min(self.policy.max_delay.max(delay))
    }

    // =========================================================================
    // Background worker
    // =========================================================================

    /// Start a task that drains whenever writes are enqueued.
    ///
    /// Must be called inside a Tokio runtime. Replaces any running worker.
    /// The task only holds the queue while draining, so dropping the last
    /// handle stops it.
    pub fn start(self: &Arc<Self>) {
        let queue = Arc::downgrade(self);
        let wake = Arc::clone(&self.wake);
        let handle = tokio::spawn(async move {
            loop {
                wake.notified().await;
                let Some(queue) = queue.upgrade() else {
                    break;
                };
                queue.drain().await;
            }
        });
        if let Some(old) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            old.abort();
        }
        info!("Sync worker started");
    }

    /// Stop the background worker. Queued writes are kept.
    pub fn stop(&self) {
        if let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            info!("Sync worker stopped");
        }
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
