//! Rate limit policies and algorithm selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RateGuardError, Result};

/// Windowing algorithm applied by the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Counter over a window anchored at the first request for a key
    #[default]
    Fixed,
    /// Log of admitted request timestamps within the trailing window
    Sliding,
}

impl Algorithm {
    /// The configuration name of this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Fixed => "fixed",
            Algorithm::Sliding => "sliding",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = RateGuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Algorithm::Fixed),
            "sliding" => Ok(Algorithm::Sliding),
            other => Err(RateGuardError::Config(format!(
                "unknown algorithm '{}', expected 'fixed' or 'sliding'",
                other
            ))),
        }
    }
}

/// A validated rate policy: at most `max` requests per `window_ms`.
///
/// Policies can only be built through [`RateLimitPolicy::new`] or
/// deserialization, both of which reject a non-positive window or a negative
/// maximum. A policy in hand is therefore always usable per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPolicy")]
pub struct RateLimitPolicy {
    window_ms: u64,
    max: u64,
    algorithm: Algorithm,
}

#[derive(Deserialize)]
struct RawPolicy {
    window_ms: i64,
    max: i64,
    #[serde(default)]
    algorithm: Algorithm,
}

impl TryFrom<RawPolicy> for RateLimitPolicy {
    type Error = RateGuardError;

    fn try_from(raw: RawPolicy) -> Result<Self> {
        RateLimitPolicy::new(raw.window_ms, raw.max, raw.algorithm)
    }
}

impl RateLimitPolicy {
    /// Validate and build a policy.
    pub fn new(window_ms: i64, max: i64, algorithm: Algorithm) -> Result<Self> {
        if window_ms <= 0 {
            return Err(RateGuardError::Config(format!(
                "window_ms must be a positive number of milliseconds, got {}",
                window_ms
            )));
        }
        if max < 0 {
            return Err(RateGuardError::Config(format!(
                "max must be zero or greater, got {}",
                max
            )));
        }

        Ok(Self {
            window_ms: window_ms as u64,
            max: max as u64,
            algorithm,
        })
    }

    /// Fixed-window policy.
    pub fn fixed(window_ms: i64, max: i64) -> Result<Self> {
        Self::new(window_ms, max, Algorithm::Fixed)
    }

    /// Sliding-window-log policy.
    pub fn sliding(window_ms: i64, max: i64) -> Result<Self> {
        Self::new(window_ms, max, Algorithm::Sliding)
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Maximum admitted requests per window.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Windowing algorithm to apply.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}
