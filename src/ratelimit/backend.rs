//! Rate limiter trait for abstracting decision engines.

use async_trait::async_trait;

use super::policy::RateLimitPolicy;
use super::record::RateLimitResult;
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// The guard works against this trait rather than a concrete [`Limiter`],
/// so any engine producing a [`RateLimitResult`] can sit behind it.
///
/// [`Limiter`]: super::Limiter
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Record one request for `key` under `policy` and return the decision.
    async fn check(&self, key: &str, policy: &RateLimitPolicy) -> Result<RateLimitResult>;
}
