//! The owning collection of named breakers
//!
//! A [`BreakerRegistry`] is the single source of truth for the breakers of a
//! process: exactly one breaker per name, atomic registration under
//! contention, bulk statistics and reset, and declarative bulk loading from
//! already-parsed configuration records.
//!
//! The registry is an explicit value owned by the application context and
//! passed to collaborators, constructed once at startup. It is not a hidden
//! global, so tests and embedded uses can run several registries side by
//! side.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::breaker::Breaker;
use crate::clock::{Clock, SystemClock};
use crate::config::{BreakerConfig, BreakerRecord};
use crate::error::RegistryError;
use crate::stats::StatsSnapshot;

type BreakerMap<C> = HashMap<String, Arc<Breaker<C>>>;

/// Process-wide collection of named breakers.
///
/// Breakers are handed out as `Arc`s: removing a name from the registry does
/// not affect in-flight calls through references obtained earlier.
pub struct BreakerRegistry<C: Clock + Clone = SystemClock> {
    breakers: RwLock<BreakerMap<C>>,
    clock: C,
}

impl BreakerRegistry<SystemClock> {
    /// Create an empty registry using the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for BreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> BreakerRegistry<C> {
    /// Create an empty registry whose breakers share `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self { breakers: RwLock::new(HashMap::new()), clock }
    }

    /// Register a new breaker built from `config`.
    ///
    /// Atomic under contention: concurrent registrations of one name yield
    /// exactly one winner; the others get
    /// [`RegistryError::DuplicateName`]. Construction happens under the map
    /// lock, so readers never observe a partially built breaker.
    pub fn register(&self, config: BreakerConfig) -> Result<Arc<Breaker<C>>, RegistryError> {
        let name = config.name.clone();
        let mut map = self.write_map();
        if map.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        let breaker = Arc::new(Breaker::with_clock(config, self.clock.clone())?);
        map.insert(name.clone(), Arc::clone(&breaker));
        info!(breaker = %name, "registered circuit breaker");
        Ok(breaker)
    }

    /// Non-failing lookup by name.
    pub fn get(&self, name: &str) -> Option<Arc<Breaker<C>>> {
        self.read_map().get(name).cloned()
    }

    /// Look up `name`, registering a breaker from `config` when absent.
    ///
    /// Race-safe: if another caller registers the same name concurrently,
    /// their breaker is returned instead of an error.
    pub fn get_or_register(&self, config: BreakerConfig) -> Result<Arc<Breaker<C>>, RegistryError> {
        loop {
            if let Some(existing) = self.get(&config.name) {
                return Ok(existing);
            }
            match self.register(config.clone()) {
                Ok(breaker) => return Ok(breaker),
                // Lost the race; the winner's breaker is picked up above.
                Err(RegistryError::DuplicateName(_)) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Remove a breaker by name. Returns whether a breaker was removed.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.write_map().remove(name).is_some();
        if removed {
            info!(breaker = %name, "removed circuit breaker");
        } else {
            debug!(breaker = %name, "remove: no such circuit breaker");
        }
        removed
    }

    /// Whether a breaker with `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.read_map().contains_key(name)
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    /// Whether no breakers are registered.
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_map().keys().cloned().collect();
        names.sort();
        names
    }

    /// Statistics snapshots for every registered breaker, keyed by name.
    pub fn all_stats(&self) -> BTreeMap<String, StatsSnapshot> {
        self.read_map().iter().map(|(name, breaker)| (name.clone(), breaker.snapshot())).collect()
    }

    /// Reset every registered breaker back to CLOSED.
    ///
    /// Not atomic across breakers; each individual reset is atomic and no
    /// breaker is left partially reset.
    pub fn reset_all(&self) {
        let breakers: Vec<Arc<Breaker<C>>> = self.read_map().values().cloned().collect();
        info!(count = breakers.len(), "resetting all circuit breakers");
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// Register a breaker per declarative record, in order.
    ///
    /// A record naming an unknown failure kind degrades to the any-failure
    /// classification (the record itself still loads). The first
    /// duplicate-name failure aborts the remaining load; callers needing
    /// partial-load tolerance must pre-validate their records.
    pub fn load_records(
        &self,
        records: impl IntoIterator<Item = BreakerRecord>,
    ) -> Result<usize, RegistryError> {
        let mut loaded = 0;
        for record in records {
            self.register(record.into_config()?)?;
            loaded += 1;
        }
        info!(count = loaded, "loaded circuit breakers from config records");
        Ok(loaded)
    }

    fn read_map(&self) -> RwLockReadGuard<'_, BreakerMap<C>> {
        match self.breakers.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("breaker registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, BreakerMap<C>> {
        match self.breakers.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("breaker registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
