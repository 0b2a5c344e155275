//! Error types for breaker calls, registry operations and configuration
//!
//! A breaker never hides or rewrites the underlying operation failure; it
//! only layers one additional failure mode in front of it (the rejection of
//! a call while the circuit is open).

use thiserror::Error;

/// Errors surfaced by a protected call.
///
/// Generic over the wrapped operation's error type `E` so the original
/// failure is preserved as the `#[source]` of [`BreakerError::Operation`].
#[derive(Debug, Error)]
pub enum BreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The circuit is open (or a recovery probe is already in flight) and
    /// the call was rejected without executing the operation.
    #[error("circuit breaker '{name}' is open, rejecting calls")]
    CircuitOpen {
        /// Name of the rejecting breaker.
        name: String,
    },

    /// The operation ran and failed; the original error is attached
    /// unchanged.
    #[error("operation failed under circuit breaker protection")]
    Operation {
        #[source]
        source: E,
    },
}

impl<E> BreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// True when the call was rejected without running the operation.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Recover the underlying operation error, if the operation ran.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Operation { source } => Some(source),
            Self::CircuitOpen { .. } => None,
        }
    }
}

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A breaker with this name already exists; registration never silently
    /// overwrites.
    #[error("circuit breaker '{0}' is already registered")]
    DuplicateName(String),

    /// No breaker with this name is registered and auto-registration was not
    /// requested.
    #[error("circuit breaker '{0}' not found")]
    NotFound(String),

    /// The supplied configuration failed validation.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result alias for protected calls.
pub type CallResult<T, E> = Result<T, BreakerError<E>>;

/// Result alias for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;
