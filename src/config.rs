//! Configuration management for RateGuard.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RateGuardError, Result};
use crate::guard::{RateGuardOptions, DEFAULT_MESSAGE, DEFAULT_STATUS_CODE};
use crate::ratelimit::{Algorithm, RateLimitPolicy};

/// Prefix for environment overrides, e.g. `RATEGUARD__POLICY__MAX=10`.
const ENV_PREFIX: &str = "RATEGUARD";

/// Main configuration for RateGuard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateGuardConfig {
    /// Rate policy applied to every key
    #[serde(default)]
    pub policy: PolicyConfig,

    /// In-memory store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rejection behaviour
    #[serde(default)]
    pub guard: GuardConfig,
}

/// Rate policy configuration.
///
/// Values are kept signed so a bad file is reported as a configuration error
/// rather than failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,

    #[serde(default = "default_max")]
    pub max: i64,

    #[serde(default)]
    pub algorithm: Algorithm,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max: default_max(),
            algorithm: Algorithm::default(),
        }
    }
}

fn default_window_ms() -> i64 {
    60_000
}

fn default_max() -> i64 {
    100
}

/// Memory store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Interval between expiry sweeps in milliseconds; 0 disables sweeping
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

impl StoreConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

/// Rejection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_status_code")]
    pub status_code: u16,

    #[serde(default = "default_message")]
    pub message: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            status_code: default_status_code(),
            message: default_message(),
        }
    }
}

fn default_status_code() -> u16 {
    DEFAULT_STATUS_CODE
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

/// Policy values that take precedence over every configuration source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyOverrides {
    pub window_ms: Option<i64>,
    pub max: Option<i64>,
    pub algorithm: Option<Algorithm>,
}

impl RateGuardConfig {
    /// Load configuration from an optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, &PolicyOverrides::default())
    }

    /// Load configuration with `overrides` layered on top of the file and
    /// environment. Validation runs once, on the merged result.
    pub fn load_with(path: Option<&Path>, overrides: &PolicyOverrides) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(File::from(path));
        }

        let config: RateGuardConfig = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .set_override_option("policy.window_ms", overrides.window_ms)?
            .set_override_option("policy.max", overrides.max)?
            .set_override_option("policy.algorithm", overrides.algorithm.map(|a| a.as_str()))?
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateGuardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RateGuardError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the policy and guard settings without building anything.
    pub fn validate(&self) -> Result<()> {
        self.policy()?;
        if !(100..=599).contains(&self.guard.status_code) {
            return Err(RateGuardError::Config(format!(
                "guard.status_code must be a valid HTTP status, got {}",
                self.guard.status_code
            )));
        }
        Ok(())
    }

    /// The validated rate policy.
    pub fn policy(&self) -> Result<RateLimitPolicy> {
        RateLimitPolicy::new(self.policy.window_ms, self.policy.max, self.policy.algorithm)
    }

    /// Options for building a [`RateGuard`](crate::guard::RateGuard).
    pub fn guard_options(&self) -> RateGuardOptions {
        RateGuardOptions {
            window_ms: self.policy.window_ms,
            max: self.policy.max,
            algorithm: self.policy.algorithm,
            status_code: self.guard.status_code,
            message: self.guard.message.clone(),
        }
    }
}
