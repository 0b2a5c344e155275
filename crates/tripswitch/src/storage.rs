//! Pluggable state persistence
//!
//! A breaker keeps its state in memory by default. Deployments that want
//! state to survive the owning component (or to be inspected out of band)
//! can supply a [`StateStore`]; the breaker writes through on every state or
//! failure-count change and seeds itself from the store at construction.
//!
//! Monotonic instants do not round-trip a process restart, so a breaker
//! loaded as OPEN starts a fresh recovery window.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::warn;

use crate::breaker::CircuitState;

/// Persisted portion of a breaker's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredState {
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Externally-owned store for breaker state, keyed by breaker name.
///
/// Implementations must be safe to call from concurrent breaker callers.
/// Stores are best-effort from the breaker's perspective: the in-memory
/// fields remain authoritative within a process.
pub trait StateStore: Send + Sync {
    /// Load the persisted state for `name`, if any.
    fn load(&self, name: &str) -> Option<StoredState>;

    /// Persist the current state for `name`.
    fn save(&self, name: &str, state: &StoredState);
}

/// In-memory [`StateStore`], useful in tests and as a shared store between
/// breakers that are rebuilt within one process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, StoredState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, name: &str) -> Option<StoredState> {
        match self.inner.read() {
            Ok(guard) => guard.get(name).copied(),
            Err(poisoned) => {
                warn!(breaker = name, "state store lock poisoned during load");
                poisoned.into_inner().get(name).copied()
            }
        }
    }

    fn save(&self, name: &str, state: &StoredState) {
        match self.inner.write() {
            Ok(mut guard) => {
                guard.insert(name.to_string(), *state);
            }
            Err(poisoned) => {
                warn!(breaker = name, "state store lock poisoned during save");
                poisoned.into_inner().insert(name.to_string(), *state);
            }
        }
    }
}
