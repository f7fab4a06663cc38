//! Storage of per-key rate limit records.
//!
//! The limiter round-trips through a [`Store`] once to read and once to write
//! on every check. Stores own expiry: a record set with a TTL must read as
//! absent once the TTL has elapsed, however the store chooses to reclaim it.

mod memory;

pub use memory::{MemoryStore, MemoryStoreBuilder};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::ratelimit::RateLimitRecord;

/// Storage backend for rate limit records.
///
/// Absent or expired keys are never errors. `Err` is reserved for genuine
/// backend faults, which the limiter hands back to its caller untouched.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the live record for `key`.
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>>;

    /// Store `record` under `key`, expiring `ttl` from now.
    ///
    /// Always overwrites; there is no compare-and-swap.
    async fn set(&self, key: &str, record: RateLimitRecord, ttl: Duration) -> Result<()>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, record: RateLimitRecord, ttl: Duration) -> Result<()> {
        (**self).set(key, record, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

#[async_trait]
impl<S: Store + ?Sized> Store for Box<S> {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, record: RateLimitRecord, ttl: Duration) -> Result<()> {
        (**self).set(key, record, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}
