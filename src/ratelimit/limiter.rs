//! Core rate limiter implementation.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::clock::{Clock, SystemClock};
use super::policy::{Algorithm, RateLimitPolicy};
use super::record::{RateLimitRecord, RateLimitResult};
use crate::error::Result;
use crate::store::Store;

/// The decision engine.
///
/// A limiter holds no per-key state; every check reads the key's record from
/// the store, computes the decision, and writes the updated record back. It
/// can be shared freely across tasks.
///
/// The read and the write are not atomic. Two concurrent checks for the same
/// key may both read the same record and both be admitted. Stores that need
/// strict accounting under contention must serialize per key themselves.
pub struct Limiter<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

/// Hit count and reset time computed by one algorithm step.
struct Outcome {
    record: RateLimitRecord,
    hit_count: u64,
    reset_time: u64,
}

impl<S: Store> Limiter<S> {
    /// Create a limiter over `store` using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit time source.
    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record a request for `key` and decide whether it is admitted.
    ///
    /// Store errors are returned as-is, without retry.
    pub async fn check(&self, key: &str, policy: &RateLimitPolicy) -> Result<RateLimitResult> {
        let now = self.clock.now_ms();
        let window_ms = policy.window_ms();
        let max = policy.max();

        trace!(
            key = %key,
            algorithm = %policy.algorithm(),
            window_ms = window_ms,
            max = max,
            "Checking rate limit"
        );

        let current = self.store.get(key).await?;

        let outcome = match policy.algorithm() {
            Algorithm::Fixed => fixed_window(current, now, window_ms),
            Algorithm::Sliding => sliding_log(current, now, window_ms, max),
        };

        self.store.set(key, outcome.record, policy.window()).await?;

        let blocked = outcome.hit_count > max;
        let remaining = if blocked {
            0
        } else {
            max.saturating_sub(outcome.hit_count)
        };

        if blocked {
            debug!(
                key = %key,
                hits = outcome.hit_count,
                limit = max,
                "Rate limit exceeded"
            );
        }

        Ok(RateLimitResult {
            blocked,
            limit: max,
            remaining,
            reset_time: outcome.reset_time,
        })
    }
}

/// Count the hit against a window anchored at the key's first request.
fn fixed_window(current: Option<RateLimitRecord>, now: u64, window_ms: u64) -> Outcome {
    // A record of the other shape is treated as no record.
    let live_window = current
        .as_ref()
        .and_then(RateLimitRecord::fixed_window)
        .filter(|(_, window_start)| now.saturating_sub(*window_start) < window_ms);

    match live_window {
        Some((count, window_start)) => {
            let hit_count = count + 1;
            Outcome {
                record: RateLimitRecord::FixedWindow {
                    count: hit_count,
                    window_start,
                },
                hit_count,
                reset_time: window_start + window_ms,
            }
        }
        None => {
            trace!(window_start = now, "Starting new fixed window");
            Outcome {
                record: RateLimitRecord::FixedWindow {
                    count: 1,
                    window_start: now,
                },
                hit_count: 1,
                reset_time: now + window_ms,
            }
        }
    }
}

/// Judge the hit against the admitted timestamps still inside the window.
///
/// Rejected hits are not logged, so they never push the reset time out.
fn sliding_log(current: Option<RateLimitRecord>, now: u64, window_ms: u64, max: u64) -> Outcome {
    let window_start = now.saturating_sub(window_ms);

    let mut timestamps: Vec<u64> = current
        .and_then(RateLimitRecord::into_timestamps)
        .unwrap_or_default();
    timestamps.retain(|t| *t > window_start);

    let valid = timestamps.len() as u64;
    if valid < max {
        timestamps.push(now);
    }
    // A rejected hit still reports one past the logged count.
    let hit_count = valid + 1;

    let reset_time = timestamps
        .first()
        .map_or(now + window_ms, |oldest| oldest + window_ms);

    Outcome {
        record: RateLimitRecord::SlidingLog { timestamps },
        hit_count,
        reset_time,
    }
}

#[async_trait]
impl<S: Store> RateLimiterBackend for Limiter<S> {
    async fn check(&self, key: &str, policy: &RateLimitPolicy) -> Result<RateLimitResult> {
        Limiter::check(self, key, policy).await
    }
}
