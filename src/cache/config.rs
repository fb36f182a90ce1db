//! Cache configuration.
//!
//! Controls TTLs, rebuild leases and the rebuild worker pool via `flashsale.toml`.

use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_SHOP_TTL_SECS: u64 = 30 * 60;
const DEFAULT_SHOP_TYPE_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_NULL_TTL_SECS: u64 = 2 * 60;
const DEFAULT_REBUILD_LOCK_LEASE_SECS: u64 = 10;
const DEFAULT_REBUILD_CONCURRENCY: usize = 10;
const DEFAULT_MUTEX_MAX_RETRIES: u32 = 5;
const DEFAULT_MUTEX_RETRY_BACKOFF_MS: u64 = 50;
const DEFAULT_WARM_LIMIT: u32 = 500;

/// How the shop family is protected against stampedes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Null-caching; misses go straight to the store.
    PassThrough,
    /// Null-caching plus a distributed lock around rebuild on miss.
    Mutex,
    /// Pre-warmed entries with embedded expiry and background rebuild.
    LogicalExpire,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassThrough => "pass_through",
            Self::Mutex => "mutex",
            Self::LogicalExpire => "logical_expire",
        }
    }
}

impl std::str::FromStr for CacheStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pass_through" => Ok(Self::PassThrough),
            "mutex" => Ok(Self::Mutex),
            "logical_expire" => Ok(Self::LogicalExpire),
            other => Err(format!(
                "unknown cache strategy `{other}` (expected pass_through|mutex|logical_expire)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL of cached shops (store TTL or logical expiry, depending on strategy).
    pub shop_ttl: Duration,
    /// TTL of the cached shop-type list.
    pub shop_type_ttl: Duration,
    /// Store TTL of null markers.
    pub null_ttl: Duration,
    /// Lease of the lock held while a key is rebuilt.
    pub rebuild_lock_lease: Duration,
    /// Maximum concurrent background rebuild tasks per process.
    pub rebuild_concurrency: usize,
    /// Attempts made by the mutex strategy before reporting contention.
    pub mutex_max_retries: u32,
    /// Base backoff between mutex attempts; grows linearly per attempt.
    pub mutex_retry_backoff: Duration,
    pub shop_strategy: CacheStrategy,
    /// Prime the logical-expire shop family when the server starts.
    pub warm_on_startup: bool,
    /// Upper bound on shops primed per warm run.
    pub warm_limit: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shop_ttl: Duration::from_secs(DEFAULT_SHOP_TTL_SECS),
            shop_type_ttl: Duration::from_secs(DEFAULT_SHOP_TYPE_TTL_SECS),
            null_ttl: Duration::from_secs(DEFAULT_NULL_TTL_SECS),
            rebuild_lock_lease: Duration::from_secs(DEFAULT_REBUILD_LOCK_LEASE_SECS),
            rebuild_concurrency: DEFAULT_REBUILD_CONCURRENCY,
            mutex_max_retries: DEFAULT_MUTEX_MAX_RETRIES,
            mutex_retry_backoff: Duration::from_millis(DEFAULT_MUTEX_RETRY_BACKOFF_MS),
            shop_strategy: CacheStrategy::LogicalExpire,
            warm_on_startup: true,
            warm_limit: DEFAULT_WARM_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            shop_ttl: settings.shop_ttl,
            shop_type_ttl: settings.shop_type_ttl,
            null_ttl: settings.null_ttl,
            rebuild_lock_lease: settings.rebuild_lock_lease,
            rebuild_concurrency: settings.rebuild_concurrency.get() as usize,
            mutex_max_retries: settings.mutex_max_retries.get(),
            mutex_retry_backoff: settings.mutex_retry_backoff,
            shop_strategy: settings.shop_strategy,
            warm_on_startup: settings.warm_on_startup,
            warm_limit: settings.warm_limit.get(),
        }
    }
}

impl CacheConfig {
    /// Rebuild pool size, clamped to at least one worker.
    pub fn rebuild_concurrency_non_zero(&self) -> usize {
        self.rebuild_concurrency.max(1)
    }

    /// Attempt count of the mutex strategy, clamped to at least one.
    pub fn mutex_attempts(&self) -> u32 {
        self.mutex_max_retries.max(1)
    }
}
