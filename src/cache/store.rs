//! Cache store abstraction.
//!
//! The coordination layer only needs a handful of atomic primitives from the
//! shared key-value store. `RedisCacheStore` (in `infra::redis`) is the
//! production adapter; `MemoryCacheStore` backs single-instance runs and tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache store unavailable: {message}")]
    Unavailable { message: String },
    #[error("cache store operation timed out")]
    Timeout,
    #[error("unexpected cache store reply: {message}")]
    Protocol { message: String },
}

impl CacheStoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Transport failures and timeouts are worth retrying; protocol errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout)
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError>;

    /// Plain write. `ttl = None` leaves the key without a store-side expiry.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheStoreError>;

    /// Atomic set-if-absent with expiry. Returns `true` when the key was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheStoreError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError>;

    /// Atomic compare-and-delete. Returns `true` only when the stored value
    /// equalled `expected` and the key was removed.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheStoreError>;

    /// Atomic increment; a missing key starts at zero.
    async fn incr(&self, key: &str) -> Result<i64, CacheStoreError>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// In-process cache store.
///
/// Every primitive runs under the owning shard lock, so the atomicity matches
/// what Redis offers. It is only shared by tasks of one process and must not
/// be used when several instances are deployed.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining store-side TTL for a key, `None` when the key is missing or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries.get(key).and_then(|entry| {
            let deadline = entry.expires_at?;
            deadline.checked_duration_since(now)
        })
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheStoreError> {
        self.entries
            .insert(key.to_string(), MemoryEntry::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheStoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(MemoryEntry::new(value, Some(ttl)));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheStoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, entry| entry.is_live(now) && entry.value == expected)
            .is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheStoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if !entry.is_live(now) {
                    *entry = MemoryEntry::new("1", None);
                    return Ok(1);
                }
                let current: i64 = entry.value.parse().map_err(|_| {
                    CacheStoreError::protocol(format!("value at `{key}` is not an integer"))
                })?;
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| CacheStoreError::protocol("increment would overflow"))?;
                entry.value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new("1", None));
                Ok(1)
            }
        }
    }
}
