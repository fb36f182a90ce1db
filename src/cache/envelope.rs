//! Wire format of cached values.
//!
//! Each value is wrapped in a versioned envelope and decoded into the static
//! type of its key family. A version mismatch or a malformed body is reported
//! as a [`DecodeError`] and callers treat it like a miss.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Bump whenever the encoded shape of any family changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<B> {
    pub schema_version: u32,
    pub payload: B,
}

impl<B> Envelope<B> {
    pub fn new(payload: B) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            payload,
        }
    }
}

/// Pass-through family body: either the entity or the null marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Slot<T> {
    Present(T),
    /// Confirmed absent in the backing store. Always written with a store TTL.
    Absent,
}

/// Logical-expire family body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub payload: T,
    #[serde(with = "time::serde::rfc3339")]
    pub logical_expiry: OffsetDateTime,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T, ttl: Duration) -> Self {
        Self::expiring_at(payload, OffsetDateTime::now_utc() + ttl)
    }

    pub fn expiring_at(payload: T, logical_expiry: OffsetDateTime) -> Self {
        Self {
            payload,
            logical_expiry,
        }
    }

    pub fn is_fresh_at(&self, now: OffsetDateTime) -> bool {
        self.logical_expiry > now
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cache value has schema version {found}, expected {SCHEMA_VERSION}")]
    SchemaVersion { found: u32 },
    #[error("cache value is malformed: {0}")]
    Malformed(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct VersionProbe {
    schema_version: u32,
}

pub fn encode<B: Serialize>(payload: &B) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope {
        schema_version: SCHEMA_VERSION,
        payload,
    })
}

pub fn decode<B: DeserializeOwned>(raw: &str) -> Result<B, DecodeError> {
    let probe: VersionProbe = serde_json::from_str(raw).map_err(DecodeError::Malformed)?;
    if probe.schema_version != SCHEMA_VERSION {
        return Err(DecodeError::SchemaVersion {
            found: probe.schema_version,
        });
    }
    let envelope: Envelope<B> = serde_json::from_str(raw).map_err(DecodeError::Malformed)?;
    Ok(envelope.payload)
}
