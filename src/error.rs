//! Error types for RateGuard.

use thiserror::Error;

/// Boxed error raised by a storage backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for RateGuard operations.
#[derive(Error, Debug)]
pub enum RateGuardError {
    /// Invalid policy or options, raised at setup time only
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reported by a store backend, passed through unmodified
    #[error("Store error: {0}")]
    Store(#[source] BoxError),

    /// Configuration source errors (file or environment layering)
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RateGuardError {
    /// Wrap a backend failure.
    pub fn store<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        RateGuardError::Store(err.into())
    }

    /// Whether this error was raised while validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, RateGuardError::Config(_) | RateGuardError::Settings(_))
    }
}

/// Result type alias for RateGuard operations.
pub type Result<T> = std::result::Result<T, RateGuardError>;
