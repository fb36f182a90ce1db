//! Lease-based distributed mutex on top of the shared cache store.
//!
//! Acquisition is a single `SET NX` with a lease; release is a compare-and-delete
//! on the per-acquisition token, so a holder whose lease ran out can never
//! remove a lock that somebody else acquired afterwards.

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use metrics::counter;
use tracing::{debug, warn};
use uuid::Uuid;

use super::keys::lock_key;
use super::store::{CacheStore, CacheStoreError};

const METRIC_LOCK_CONTENDED: &str = "flashsale_lock_contended_total";

/// Proof of ownership for one acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: String,
    token: String,
    lease: Duration,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The lease expired and the key is gone or belongs to another holder.
    NotOwner,
}

#[derive(Clone)]
pub struct DistributedMutex {
    store: Arc<dyn CacheStore>,
}

impl DistributedMutex {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Try once to take `lock:{name}`. `Ok(None)` means another holder is active.
    pub async fn try_acquire(
        &self,
        name: &str,
        lease: Duration,
    ) -> Result<Option<LockHandle>, CacheStoreError> {
        let key = lock_key(name);
        let token = Uuid::new_v4().to_string();

        if self.store.set_if_absent(&key, &token, lease).await? {
            debug!(
                target = "flashsale::cache::mutex",
                op = "try_acquire",
                key = %key,
                lease_ms = lease.as_millis() as u64,
                result = "acquired",
                "lock acquired"
            );
            Ok(Some(LockHandle { key, token, lease }))
        } else {
            counter!(METRIC_LOCK_CONTENDED, "lock" => lock_family(name)).increment(1);
            debug!(
                target = "flashsale::cache::mutex",
                op = "try_acquire",
                key = %key,
                result = "contended",
                "lock held elsewhere"
            );
            Ok(None)
        }
    }

    pub async fn release(&self, handle: &LockHandle) -> Result<ReleaseOutcome, CacheStoreError> {
        if self
            .store
            .delete_if_equals(&handle.key, &handle.token)
            .await?
        {
            Ok(ReleaseOutcome::Released)
        } else {
            Ok(ReleaseOutcome::NotOwner)
        }
    }

    /// Run `work` while holding `handle`, then release it on every exit path.
    ///
    /// A panic inside `work` is resumed after the release attempt. Release
    /// failures are only logged: the lease bounds how long the key can linger.
    pub async fn run_guarded<F, T>(&self, handle: LockHandle, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(work).catch_unwind().await;
        self.release_logged(&handle).await;
        match outcome {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    pub(crate) async fn release_logged(&self, handle: &LockHandle) {
        match self.release(handle).await {
            Ok(ReleaseOutcome::Released) => {
                debug!(
                    target = "flashsale::cache::mutex",
                    op = "release",
                    key = %handle.key,
                    result = "released",
                    "lock released"
                );
            }
            Ok(ReleaseOutcome::NotOwner) => {
                warn!(
                    target = "flashsale::cache::mutex",
                    op = "release",
                    key = %handle.key,
                    lease_ms = handle.lease.as_millis() as u64,
                    result = "not_owner",
                    "lease expired before release; lock left to its current owner"
                );
            }
            Err(err) => {
                warn!(
                    target = "flashsale::cache::mutex",
                    op = "release",
                    key = %handle.key,
                    error = %err,
                    result = "error",
                    "failed to release lock; relying on lease expiry"
                );
            }
        }
    }
}

/// First segment of a lock name, used as a low-cardinality metric label.
fn lock_family(name: &str) -> String {
    name.split(':').next().unwrap_or(name).to_string()
}
