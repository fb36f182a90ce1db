//! Globally unique, time-ordered 64-bit identifiers.
//!
//! Layout: bit 63 is always zero, bits 62..32 hold seconds since
//! [`ID_EPOCH_SECONDS`], bits 31..0 hold a per-`(tag, UTC day)` sequence taken
//! from an atomic counter in the shared cache store. The counter key embeds the
//! date, so it resets implicitly every day.
//!
//! Ids are not monotonic across a backward clock step.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;

use super::keys::id_counter_key;
use super::store::{CacheStore, CacheStoreError};

/// 2022-01-01T00:00:00Z.
pub const ID_EPOCH_SECONDS: i64 = 1_640_995_200;

const SEQUENCE_BITS: u32 = 32;
const MAX_TIMESTAMP: i64 = (1 << 31) - 1;
const MAX_SEQUENCE: i64 = u32::MAX as i64;

#[derive(Debug, Error)]
pub enum IdError {
    #[error(transparent)]
    Store(#[from] CacheStoreError),
    #[error("system clock reads {seconds}s before the id epoch")]
    ClockBeforeEpoch { seconds: i64 },
    #[error("id timestamp space exhausted")]
    TimestampOverflow,
    #[error("sequence for `{tag}` exhausted for the current day")]
    SequenceExhausted { tag: String },
}

#[derive(Clone)]
pub struct IdGenerator {
    store: Arc<dyn CacheStore>,
    epoch_seconds: i64,
}

impl IdGenerator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_epoch(store, ID_EPOCH_SECONDS)
    }

    pub fn with_epoch(store: Arc<dyn CacheStore>, epoch_seconds: i64) -> Self {
        Self {
            store,
            epoch_seconds,
        }
    }

    pub async fn next_id(&self, business_tag: &str) -> Result<i64, IdError> {
        self.next_id_at(business_tag, OffsetDateTime::now_utc()).await
    }

    /// Issue an id as if the clock read `now`.
    pub async fn next_id_at(
        &self,
        business_tag: &str,
        now: OffsetDateTime,
    ) -> Result<i64, IdError> {
        let now = now.to_offset(time::UtcOffset::UTC);
        let elapsed = now.unix_timestamp() - self.epoch_seconds;
        if elapsed < 0 {
            return Err(IdError::ClockBeforeEpoch { seconds: -elapsed });
        }
        if elapsed > MAX_TIMESTAMP {
            return Err(IdError::TimestampOverflow);
        }

        let key = id_counter_key(business_tag, now.date());
        let sequence = self.store.incr(&key).await?;
        if !(0..=MAX_SEQUENCE).contains(&sequence) {
            return Err(IdError::SequenceExhausted {
                tag: business_tag.to_string(),
            });
        }

        Ok(compose(elapsed, sequence))
    }
}

pub fn compose(elapsed_seconds: i64, sequence: i64) -> i64 {
    (elapsed_seconds << SEQUENCE_BITS) | sequence
}

/// Split an id into `(seconds since epoch, sequence)`.
pub fn decompose(id: i64) -> (i64, i64) {
    (id >> SEQUENCE_BITS, id & MAX_SEQUENCE)
}
