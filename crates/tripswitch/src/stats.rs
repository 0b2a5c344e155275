//! Statistics snapshots for monitoring
//!
//! Snapshots are plain serializable data (strings, integers, epoch
//! milliseconds) so an external reporter can ship them to any structured
//! format; the core never serializes on its own.

use serde::Serialize;

use crate::breaker::CircuitState;

/// How many state changes a snapshot reports. The breaker retains a longer
/// history internally; see [`EVENT_HISTORY_CAP`].
pub(crate) const RECENT_CHANGES: usize = 5;

/// Upper bound on the internally retained state-change log; the oldest
/// entries are dropped past this point.
pub(crate) const EVENT_HISTORY_CAP: usize = 256;

/// One recorded state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    /// State before the transition.
    pub from: CircuitState,
    /// State after the transition.
    pub to: CircuitState,
    /// Wall-clock timestamp, milliseconds since the UNIX epoch.
    pub at_ms: u64,
}

/// Consistent copy of one breaker's counters and recent transitions.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Breaker name.
    pub name: String,
    /// State at snapshot time.
    pub state: CircuitState,
    /// Counted failures toward the threshold (meaningful while CLOSED or
    /// HALF_OPEN).
    pub failure_count: u32,
    /// Every invocation, including blocked ones.
    pub total_calls: u64,
    /// Calls whose operation completed successfully.
    pub successful_calls: u64,
    /// Calls whose operation ran and failed (retryable or not).
    pub failed_calls: u64,
    /// Calls rejected without running the operation.
    pub blocked_calls: u64,
    /// Timestamp of the most recent success, if any.
    pub last_success_ms: Option<u64>,
    /// Timestamp of the most recent failure, if any.
    pub last_failure_ms: Option<u64>,
    /// The last few state changes, oldest first.
    pub recent_state_changes: Vec<StateChange>,
    /// Echo of the effective configuration.
    pub config: ConfigEcho,
}

/// Configuration echo embedded in every snapshot, mirroring what monitoring
/// dashboards want next to the counters.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigEcho {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub retryable_failures: Vec<&'static str>,
}
