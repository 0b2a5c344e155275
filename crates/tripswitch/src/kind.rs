//! Failure classification
//!
//! Not every error should trip a breaker: a missing row or a 404 is an
//! expected outcome, while a connection timeout signals an unhealthy
//! dependency. Errors are mapped to a closed set of [`FailureKind`] tags by a
//! [`FailureClassifier`]; only kinds listed in the breaker's retryable set
//! count toward the failure threshold. Everything else propagates to the
//! caller without touching breaker state.
//!
//! Declarative configuration names kinds by string. Unknown names degrade to
//! the most general "any failure" classification instead of failing the load
//! (and are never evaluated as code).

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

/// Closed set of breaker-relevant failure classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation did not complete in time.
    Timeout,
    /// The dependency could not be reached or the connection dropped.
    Connection,
    /// The dependency answered with a malformed or error response.
    Protocol,
    /// The dependency is shedding load (throttling, quota exhaustion).
    RateLimited,
    /// A local resource problem (I/O, file descriptors, memory).
    Resource,
    /// Anything that fits no other tag.
    Other,
}

impl FailureKind {
    /// Resolve a configuration identifier to a kind.
    ///
    /// Accepts both the snake_case tag names and the exception-style names
    /// commonly found in migrated configuration files.
    pub fn resolve(name: &str) -> Option<Self> {
        match name {
            "timeout" | "timed_out" | "TimeoutError" => Some(Self::Timeout),
            "connection" | "ConnectionError" | "ConnectionRefusedError" => Some(Self::Connection),
            "protocol" | "http" | "ProtocolError" | "RequestException" => Some(Self::Protocol),
            "rate_limited" | "throttled" | "RateLimitError" => Some(Self::RateLimited),
            "resource" | "io" | "OSError" | "IOError" => Some(Self::Resource),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Stable tag name, used when echoing configuration in statistics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Protocol => "protocol",
            Self::RateLimited => "rate_limited",
            Self::Resource => "resource",
            Self::Other => "other",
        }
    }
}

/// The set of failure kinds that count toward a breaker's threshold.
#[derive(Debug, Clone)]
pub enum FailureKinds {
    /// Every classified failure counts (the most general classification).
    Any,
    /// Only the listed kinds count; all other failures pass through inertly.
    Only(Vec<FailureKind>),
}

impl FailureKinds {
    /// Whether a classified failure counts toward the threshold.
    pub fn matches(&self, kind: FailureKind) -> bool {
        match self {
            Self::Any => true,
            Self::Only(kinds) => kinds.contains(&kind),
        }
    }

    /// Build a set from configuration identifiers.
    ///
    /// An empty list means "any failure". A name that resolves to no known
    /// kind widens the whole set to [`FailureKinds::Any`]: the unknown name
    /// was meant to count something, and the general classification is the
    /// safe reading of that intent.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        if names.is_empty() {
            return Self::Any;
        }
        let mut kinds = Vec::with_capacity(names.len());
        for name in names {
            match FailureKind::resolve(name.as_ref()) {
                Some(kind) => {
                    if !kinds.contains(&kind) {
                        kinds.push(kind);
                    }
                }
                None => {
                    warn!(
                        kind = name.as_ref(),
                        "unknown failure kind in config, falling back to any-failure"
                    );
                    return Self::Any;
                }
            }
        }
        Self::Only(kinds)
    }

    /// Tag names for statistics export.
    pub fn names(&self) -> Vec<&'static str> {
        match self {
            Self::Any => vec!["any"],
            Self::Only(kinds) => kinds.iter().map(FailureKind::name).collect(),
        }
    }
}

impl Default for FailureKinds {
    fn default() -> Self {
        Self::Any
    }
}

/// Maps an operation error to a [`FailureKind`].
///
/// The classifier sees the error as `&dyn Error` and may downcast to known
/// concrete types. Supplied per breaker in [`BreakerConfig`]; see
/// [`default_classifier`] for the stock behavior.
///
/// [`BreakerConfig`]: crate::BreakerConfig
pub type FailureClassifier =
    Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> FailureKind + Send + Sync>;

/// Stock classifier: understands `std::io::Error` kinds, tags everything
/// else [`FailureKind::Other`].
pub fn default_classifier() -> FailureClassifier {
    Arc::new(|error| {
        use std::io::ErrorKind;

        let Some(io) = error.downcast_ref::<std::io::Error>() else {
            return FailureKind::Other;
        };
        match io.kind() {
            ErrorKind::TimedOut => FailureKind::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe => FailureKind::Connection,
            ErrorKind::InvalidData => FailureKind::Protocol,
            ErrorKind::OutOfMemory | ErrorKind::WouldBlock => FailureKind::Resource,
            _ => FailureKind::Other,
        }
    })
}
