//! Cache-aside client.
//!
//! Read-through helpers over the shared cache store with two stampede
//! defenses:
//!
//! - **Pass-through with null caching**: absent ids are remembered as a null
//!   marker with a short store TTL, so repeated lookups stop hitting the store.
//! - **Logical expiration**: entries carry their own expiry and never expire in
//!   the store. A stale hit is served immediately while a single background
//!   task, guarded by the distributed mutex, rebuilds the entry.
//!
//! `query_with_mutex` is the blocking variant: on a miss callers take turns
//! through the mutex with bounded, linearly growing backoff.

use std::{fmt::Display, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::config::CacheConfig;
use super::envelope::{CacheEntry, Slot, decode, encode};
use super::keys::KeyPrefix;
use super::mutex::{DistributedMutex, LockHandle};
use super::store::{CacheStore, CacheStoreError};

const METRIC_CACHE_HIT: &str = "flashsale_cache_hit_total";
const METRIC_CACHE_MISS: &str = "flashsale_cache_miss_total";
const METRIC_CACHE_NULL_HIT: &str = "flashsale_cache_null_hit_total";
const METRIC_CACHE_STALE_HIT: &str = "flashsale_cache_stale_hit_total";
const METRIC_CACHE_REBUILD: &str = "flashsale_cache_rebuild_total";
const METRIC_CACHE_REBUILD_FAILED: &str = "flashsale_cache_rebuild_failed_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] CacheStoreError),
    #[error("failed to encode cache value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("lock for `{key}` stayed contended after {attempts} attempts")]
    Contended { key: String, attempts: u32 },
}

#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    mutex: DistributedMutex,
    config: CacheConfig,
    rebuild_permits: Arc<Semaphore>,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        let permits = config.rebuild_concurrency_non_zero();
        Self {
            mutex: DistributedMutex::new(store.clone()),
            store,
            config,
            rebuild_permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn mutex(&self) -> &DistributedMutex {
        &self.mutex
    }

    /// Write `value` with a store-side TTL.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.write(key, &Slot::Present(value), Some(ttl)).await
    }

    /// Write `value` wrapped with `logical_expiry = now + ttl` and no store TTL.
    pub async fn set_with_logical_expire<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
        self.write(key, &CacheEntry::new(value, ttl), None).await
    }

    pub async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.store.delete(key).await?)
    }

    pub async fn query_with_pass_through<T, ID, F, Fut, E>(
        &self,
        prefix: KeyPrefix,
        id: ID,
        fallback: F,
        ttl: Duration,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        ID: Display,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: From<CacheError>,
    {
        let key = prefix.key(&id);
        if let Some(slot) = self.read_slot::<T>(&key).await? {
            return Ok(slot_hit(prefix, slot));
        }

        counter!(METRIC_CACHE_MISS, "family" => prefix.as_str()).increment(1);
        let loaded = fallback(id).await?;
        Ok(self.store_loaded(&key, loaded, ttl).await?)
    }

    /// Pass-through lookup where a miss is rebuilt by one lock holder at a time.
    ///
    /// Waiting callers re-check the cache between attempts and give up with
    /// [`CacheError::Contended`] once the attempt budget is spent.
    pub async fn query_with_mutex<T, ID, F, Fut, E>(
        &self,
        prefix: KeyPrefix,
        id: ID,
        fallback: F,
        ttl: Duration,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        ID: Display,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: From<CacheError>,
    {
        let key = prefix.key(&id);
        let lock_name = prefix.lock_name(&id);
        let attempts = self.config.mutex_attempts();

        for attempt in 1..=attempts {
            if let Some(slot) = self.read_slot::<T>(&key).await? {
                return Ok(slot_hit(prefix, slot));
            }

            let acquired = self
                .mutex
                .try_acquire(&lock_name, self.config.rebuild_lock_lease)
                .await
                .map_err(CacheError::from)?;
            if let Some(handle) = acquired {
                return self
                    .mutex
                    .run_guarded(handle, self.load_under_lock(prefix, &key, id, fallback, ttl))
                    .await;
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.mutex_retry_backoff * attempt).await;
            }
        }

        warn!(
            target = "flashsale::cache::client",
            op = "query_with_mutex",
            key = %key,
            attempts,
            result = "contended",
            "gave up waiting for cache rebuild lock"
        );
        Err(CacheError::Contended { key, attempts }.into())
    }

    /// Logical-expiration lookup.
    ///
    /// A miss returns `None`: the family must be pre-warmed. A stale hit
    /// returns the stale payload and, if this caller wins the rebuild lock,
    /// schedules one background rebuild using the same `ttl`.
    pub async fn query_with_logical_expire<T, ID, F, Fut, E>(
        &self,
        prefix: KeyPrefix,
        id: ID,
        fallback: F,
        ttl: Duration,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        ID: Display + Send + 'static,
        F: FnOnce(ID) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: From<CacheError> + Display + Send + 'static,
    {
        let key = prefix.key(&id);
        let Some(raw) = self.store.get(&key).await.map_err(CacheError::from)? else {
            counter!(METRIC_CACHE_MISS, "family" => prefix.as_str()).increment(1);
            return Ok(None);
        };

        let entry = match decode::<CacheEntry<T>>(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    target = "flashsale::cache::client",
                    op = "query_with_logical_expire",
                    key = %key,
                    error = %err,
                    result = "undecodable",
                    "ignoring cache value that does not match the current schema"
                );
                counter!(METRIC_CACHE_MISS, "family" => prefix.as_str()).increment(1);
                return Ok(None);
            }
        };

        if entry.is_fresh_at(OffsetDateTime::now_utc()) {
            counter!(METRIC_CACHE_HIT, "family" => prefix.as_str()).increment(1);
            return Ok(Some(entry.payload));
        }

        counter!(METRIC_CACHE_STALE_HIT, "family" => prefix.as_str()).increment(1);
        let lock_name = prefix.lock_name(&id);
        match self
            .mutex
            .try_acquire(&lock_name, self.config.rebuild_lock_lease)
            .await
        {
            Ok(Some(handle)) => {
                self.spawn_rebuild(prefix, key, id, handle, fallback, ttl)
                    .await
            }
            Ok(None) => {
                debug!(
                    target = "flashsale::cache::client",
                    op = "query_with_logical_expire",
                    key = %key,
                    result = "rebuild_in_flight",
                    "serving stale value while another holder rebuilds"
                );
            }
            Err(err) => {
                warn!(
                    target = "flashsale::cache::client",
                    op = "query_with_logical_expire",
                    key = %key,
                    error = %err,
                    result = "lock_error",
                    "could not take rebuild lock; serving stale value"
                );
            }
        }

        Ok(Some(entry.payload))
    }

    /// Wait until every background rebuild scheduled so far has finished.
    pub async fn wait_for_rebuilds(&self) {
        let capacity = u32::try_from(self.config.rebuild_concurrency_non_zero()).unwrap_or(u32::MAX);
        if let Ok(permits) = self.rebuild_permits.acquire_many(capacity).await {
            drop(permits);
        }
    }

    async fn write<B: Serialize>(
        &self,
        key: &str,
        body: &B,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let raw = encode(body).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store.set(key, &raw, ttl).await?;
        Ok(())
    }

    async fn read_slot<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<Slot<T>>, CacheError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match decode::<Slot<T>>(&raw) {
            Ok(slot) => Ok(Some(slot)),
            Err(err) => {
                warn!(
                    target = "flashsale::cache::client",
                    op = "read_slot",
                    key = %key,
                    error = %err,
                    result = "undecodable",
                    "treating undecodable cache value as a miss"
                );
                Ok(None)
            }
        }
    }

    async fn store_loaded<T: Serialize>(
        &self,
        key: &str,
        loaded: Option<T>,
        ttl: Duration,
    ) -> Result<Option<T>, CacheError> {
        match loaded {
            Some(value) => {
                self.write(key, &Slot::Present(&value), Some(ttl)).await?;
                Ok(Some(value))
            }
            None => {
                self.write(key, &Slot::<T>::Absent, Some(self.config.null_ttl))
                    .await?;
                Ok(None)
            }
        }
    }

    async fn load_under_lock<T, ID, F, Fut, E>(
        &self,
        prefix: KeyPrefix,
        key: &str,
        id: ID,
        fallback: F,
        ttl: Duration,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: From<CacheError>,
    {
        // The previous holder may have filled the key between our read and acquire.
        if let Some(slot) = self.read_slot::<T>(key).await? {
            return Ok(slot_hit(prefix, slot));
        }

        counter!(METRIC_CACHE_MISS, "family" => prefix.as_str()).increment(1);
        let loaded = fallback(id).await?;
        Ok(self.store_loaded(key, loaded, ttl).await?)
    }

    async fn spawn_rebuild<T, ID, F, Fut, E>(
        &self,
        prefix: KeyPrefix,
        key: String,
        id: ID,
        handle: LockHandle,
        fallback: F,
        ttl: Duration,
    ) where
        T: Serialize + Send + Sync + 'static,
        ID: Send + 'static,
        F: FnOnce(ID) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let Ok(permit) = self.rebuild_permits.clone().try_acquire_owned() else {
            warn!(
                target = "flashsale::cache::client",
                op = "spawn_rebuild",
                key = %key,
                result = "pool_saturated",
                "rebuild pool saturated; a later reader will retry"
            );
            self.mutex.release_logged(&handle).await;
            return;
        };

        let client = self.clone();
        let span = info_span!("cache_rebuild", family = prefix.as_str(), key = %key);
        tokio::spawn(
            async move {
                let _permit = permit;
                let guarded = client
                    .mutex
                    .run_guarded(handle, client.rebuild(&key, id, fallback, ttl));
                if AssertUnwindSafe(guarded).catch_unwind().await.is_err() {
                    counter!(METRIC_CACHE_REBUILD_FAILED).increment(1);
                    error!(
                        target = "flashsale::cache::client",
                        op = "rebuild",
                        key = %key,
                        result = "inconsistent",
                        "cache rebuild panicked; lock released, stale value stays in place"
                    );
                }
            }
            .instrument(span),
        );
    }

    async fn rebuild<T, ID, F, Fut, E>(&self, key: &str, id: ID, fallback: F, ttl: Duration)
    where
        T: Serialize,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Display,
    {
        counter!(METRIC_CACHE_REBUILD).increment(1);

        let outcome = match fallback(id).await {
            Ok(Some(value)) => self
                .set_with_logical_expire(key, &value, ttl)
                .await
                .map(|_| "rebuilt")
                .map_err(|err| err.to_string()),
            Ok(None) => self
                .store
                .delete(key)
                .await
                .map(|_| "removed")
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };

        match outcome {
            Ok(result) => {
                info!(
                    target = "flashsale::cache::client",
                    op = "rebuild",
                    key = %key,
                    ttl_secs = ttl.as_secs(),
                    result,
                    "cache entry rebuilt"
                );
            }
            Err(detail) => {
                counter!(METRIC_CACHE_REBUILD_FAILED).increment(1);
                error!(
                    target = "flashsale::cache::client",
                    op = "rebuild",
                    key = %key,
                    error = %detail,
                    result = "inconsistent",
                    "cache rebuild failed; stale value stays in place"
                );
            }
        }
    }
}

fn slot_hit<T>(prefix: KeyPrefix, slot: Slot<T>) -> Option<T> {
    match slot {
        Slot::Present(value) => {
            counter!(METRIC_CACHE_HIT, "family" => prefix.as_str()).increment(1);
            Some(value)
        }
        Slot::Absent => {
            counter!(METRIC_CACHE_NULL_HIT, "family" => prefix.as_str()).increment(1);
            None
        }
    }
}
