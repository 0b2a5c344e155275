//! Breaker configuration
//!
//! [`BreakerConfig`] is immutable after construction and built through a
//! validating builder. [`BreakerRecord`] is the declarative form consumed by
//! bulk loading: an external config source parses its file format and hands
//! the registry a record list, the core never touches files.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::breaker::CircuitState;
use crate::error::{ConfigError, ConfigResult};
use crate::kind::{default_classifier, FailureClassifier, FailureKinds};
use crate::storage::StateStore;

/// Failures before the circuit opens, when not configured.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Time spent OPEN before probing, when not configured.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Observer invoked synchronously on every actual state transition with
/// `(breaker_name, old_state, new_state)`.
///
/// Listeners run on the calling thread, outside the breaker's critical
/// section, in registration order. A listener must not call back into the
/// same breaker.
pub type StateListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Immutable configuration for one named breaker.
#[derive(Clone)]
pub struct BreakerConfig {
    /// Unique breaker name.
    pub name: String,
    /// Counted failures before the circuit opens. Must be at least 1.
    pub failure_threshold: u32,
    /// Time the circuit stays OPEN before allowing a recovery probe.
    pub recovery_timeout: Duration,
    /// Which failure classifications count toward the threshold.
    pub retryable: FailureKinds,
    /// Maps operation errors to failure kinds.
    pub classifier: FailureClassifier,
    /// State-transition observers, invoked in order.
    pub listeners: Vec<StateListener>,
    /// Optional externally-owned state persistence.
    pub state_store: Option<Arc<dyn StateStore>>,
    /// Whether a success while CLOSED clears the consecutive-failure count.
    pub reset_on_success: bool,
}

impl fmt::Debug for BreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("retryable", &self.retryable)
            .field("listeners", &self.listeners.len())
            .field("state_store", &self.state_store.is_some())
            .field("reset_on_success", &self.reset_on_success)
            .finish()
    }
}

impl BreakerConfig {
    /// Start building a configuration for `name`.
    pub fn builder(name: impl Into<String>) -> BreakerConfigBuilder {
        BreakerConfigBuilder::new(name)
    }

    /// Validate invariants the builder also enforces; useful when a config
    /// is assembled by hand.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid { message: "breaker name must not be empty".into() });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be at least 1".into(),
            });
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "recovery_timeout must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Builder for [`BreakerConfig`].
pub struct BreakerConfigBuilder {
    config: BreakerConfig,
}

impl BreakerConfigBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: BreakerConfig {
                name: name.into(),
                failure_threshold: DEFAULT_FAILURE_THRESHOLD,
                recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
                retryable: FailureKinds::Any,
                classifier: default_classifier(),
                listeners: Vec::new(),
                state_store: None,
                reset_on_success: true,
            },
        }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn retryable(mut self, kinds: FailureKinds) -> Self {
        self.config.retryable = kinds;
        self
    }

    pub fn classifier(mut self, classifier: FailureClassifier) -> Self {
        self.config.classifier = classifier;
        self
    }

    /// Append a state-transition listener. Listeners fire in the order they
    /// were added.
    pub fn listener(
        mut self,
        listener: impl Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    ) -> Self {
        self.config.listeners.push(Arc::new(listener));
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.config.state_store = Some(store);
        self
    }

    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    pub fn build(self) -> ConfigResult<BreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// One declarative configuration record, as handed over by an external
/// config source.
///
/// Unknown failure-kind names degrade the record to the any-failure
/// classification; they are never resolved by evaluating code.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerRecord {
    /// Breaker name (unique key).
    pub name: String,
    /// Failures before opening; defaults to [`DEFAULT_FAILURE_THRESHOLD`].
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,
    /// Seconds spent OPEN before probing; defaults to
    /// [`DEFAULT_RECOVERY_TIMEOUT`].
    #[serde(default = "default_recovery_secs")]
    pub recovery_timeout_secs: u64,
    /// Failure-kind names that count toward the threshold; empty means any.
    #[serde(default)]
    pub retryable_failures: Vec<String>,
}

fn default_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_recovery_secs() -> u64 {
    DEFAULT_RECOVERY_TIMEOUT.as_secs()
}

impl BreakerRecord {
    /// Turn the record into a validated [`BreakerConfig`].
    pub fn into_config(self) -> ConfigResult<BreakerConfig> {
        BreakerConfig::builder(self.name)
            .failure_threshold(self.failure_threshold)
            .recovery_timeout(Duration::from_secs(self.recovery_timeout_secs))
            .retryable(FailureKinds::from_names(&self.retryable_failures))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::FailureKind;

    #[test]
    fn builder_defaults() {
        let config = BreakerConfig::builder("db").build().unwrap();
        assert_eq!(config.name, "db");
        assert_eq!(config.failure_threshold, DEFAULT_FAILURE_THRESHOLD);
        assert_eq!(config.recovery_timeout, DEFAULT_RECOVERY_TIMEOUT);
        assert!(config.retryable.matches(FailureKind::Other));
        assert!(config.reset_on_success);
        assert!(config.listeners.is_empty());
    }

    #[test]
    fn builder_rejects_zero_threshold() {
        let result = BreakerConfig::builder("db").failure_threshold(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_empty_name() {
        assert!(BreakerConfig::builder("  ").build().is_err());
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let result = BreakerConfig::builder("db").recovery_timeout(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let record: BreakerRecord = serde_json::from_str(r#"{ "name": "payments" }"#).unwrap();
        assert_eq!(record.failure_threshold, DEFAULT_FAILURE_THRESHOLD);
        assert_eq!(record.recovery_timeout_secs, DEFAULT_RECOVERY_TIMEOUT.as_secs());
        assert!(record.retryable_failures.is_empty());

        let config = record.into_config().unwrap();
        assert_eq!(config.name, "payments");
        assert!(config.retryable.matches(FailureKind::RateLimited));
    }

    #[test]
    fn record_with_kinds_filters() {
        let record: BreakerRecord = serde_json::from_str(
            r#"{ "name": "db", "failure_threshold": 2, "recovery_timeout_secs": 10,
                 "retryable_failures": ["timeout", "connection"] }"#,
        )
        .unwrap();
        let config = record.into_config().unwrap();
        assert_eq!(config.failure_threshold, 2);
        assert!(config.retryable.matches(FailureKind::Timeout));
        assert!(!config.retryable.matches(FailureKind::Protocol));
    }
}
