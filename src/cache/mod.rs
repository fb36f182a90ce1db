//! Cache consistency and coordination layer.
//!
//! Everything here talks to a [`CacheStore`] shared by every instance:
//!
//! - [`DistributedMutex`]: lease-based locks with token-checked release
//! - [`IdGenerator`]: time-ordered 64-bit ids from a day-bucketed counter
//! - [`CacheClient`]: cache-aside lookups with null caching, mutex-guarded
//!   loads and logical expiration
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! shop_strategy = "logical_expire"
//! shop_ttl_seconds = 1800
//! null_ttl_seconds = 120
//! rebuild_concurrency = 10
//! # ... see config.rs for all options
//! ```

mod client;
mod config;
pub mod envelope;
mod ids;
mod keys;
mod mutex;
mod store;

pub use client::{CacheClient, CacheError};
pub use config::{CacheConfig, CacheStrategy};
pub use envelope::{CacheEntry, Slot};
pub use ids::{ID_EPOCH_SECONDS, IdError, IdGenerator, decompose};
pub use keys::{KeyPrefix, id_counter_key, lock_key, order_lock_name};
pub use mutex::{DistributedMutex, LockHandle, ReleaseOutcome};
pub use store::{CacheStore, CacheStoreError, MemoryCacheStore};
