//! Named circuit breakers with a process-wide registry.
//!
//! A [`Breaker`] protects callers from cascading failures when invoking an
//! unreliable operation (a remote call, a database query, any fallible unit
//! of work): it tracks recent outcomes and temporarily rejects calls once
//! failures exceed a threshold. A [`BreakerRegistry`] owns the breakers of a
//! process, one per name, and supports bulk statistics, bulk reset and
//! declarative loading from already-parsed configuration records.
//!
//! The breaker is a three-state machine:
//!
//! - **CLOSED**: calls pass through, retryable failures are counted;
//! - **OPEN**: calls fail fast with [`BreakerError::CircuitOpen`] until the
//!   recovery timeout elapses;
//! - **HALF_OPEN**: exactly one trial call (the probe) runs; success closes
//!   the circuit, failure re-opens it with a fresh timer.
//!
//! ```
//! use std::time::Duration;
//! use tripswitch::{BreakerConfig, BreakerRegistry};
//!
//! let registry = BreakerRegistry::new();
//! let breaker = registry.register(
//!     BreakerConfig::builder("backend")
//!         .failure_threshold(3)
//!         .recovery_timeout(Duration::from_secs(30))
//!         .build()?,
//! )?;
//!
//! let reply = breaker.call(|| Ok::<_, std::io::Error>("pong"));
//! assert_eq!(reply.unwrap(), "pong");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The core is runtime-agnostic: [`Breaker::call_async`] is generic over the
//! operation's `Future` and works on any executor. Errors from the protected
//! operation are never swallowed or transformed; the breaker only layers its
//! own rejection error in front of them. Which failures count toward the
//! threshold is decided by a [`FailureClassifier`] against the configured
//! [`FailureKinds`]; everything else propagates with no effect on breaker
//! state.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod kind;
pub mod registry;
pub mod stats;
pub mod storage;

pub use breaker::{Breaker, CircuitState};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{
    BreakerConfig, BreakerConfigBuilder, BreakerRecord, StateListener, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_RECOVERY_TIMEOUT,
};
pub use error::{BreakerError, CallResult, ConfigError, ConfigResult, RegistryError};
pub use guard::Guarded;
pub use kind::{default_classifier, FailureClassifier, FailureKind, FailureKinds};
pub use registry::BreakerRegistry;
pub use stats::{ConfigEcho, StateChange, StatsSnapshot};
pub use storage::{MemoryStore, StateStore, StoredState};
