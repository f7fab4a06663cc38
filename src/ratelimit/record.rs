//! Persisted per-key state and the outward-facing decision.

use serde::{Deserialize, Serialize};

/// The state stored for one key.
///
/// Both algorithms share this type so a [`Store`](crate::store::Store) never
/// needs to know which one produced a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateLimitRecord {
    /// Fixed window: hits counted since `window_start` (ms since epoch)
    FixedWindow { count: u64, window_start: u64 },
    /// Sliding log: one non-decreasing timestamp per admitted request
    SlidingLog { timestamps: Vec<u64> },
}

impl RateLimitRecord {
    /// The fixed-window fields, if this record has that shape.
    pub fn fixed_window(&self) -> Option<(u64, u64)> {
        match self {
            RateLimitRecord::FixedWindow {
                count,
                window_start,
            } => Some((*count, *window_start)),
            RateLimitRecord::SlidingLog { .. } => None,
        }
    }

    /// Consume the record and return its sliding log, if it has that shape.
    pub fn into_timestamps(self) -> Option<Vec<u64>> {
        match self {
            RateLimitRecord::SlidingLog { timestamps } => Some(timestamps),
            RateLimitRecord::FixedWindow { .. } => None,
        }
    }
}

/// The decision returned for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResult {
    /// Whether the request must be rejected
    pub blocked: bool,
    /// The policy maximum
    pub limit: u64,
    /// Requests left in the current window; zero when blocked
    pub remaining: u64,
    /// When the caller's usage next decreases, in ms since epoch
    pub reset_time: u64,
}

impl RateLimitResult {
    /// Reset time in epoch seconds, rounded up.
    pub fn reset_time_secs(&self) -> u64 {
        self.reset_time.div_ceil(1000)
    }
}
