//! The per-named circuit breaker
//!
//! A [`Breaker`] gates execution of one protected operation based on its
//! recent failure history. All state-affecting fields (state, failure count,
//! `opened_at`, the probe flag, the transition log) live behind a single
//! mutex per breaker, so transitions are totally ordered and recorded
//! exactly once; statistics counters are atomics. Two breakers never contend
//! with each other.
//!
//! In OPEN state a call is rejected without suspension or operation latency.
//! HALF_OPEN admits exactly one in-flight probe; a second caller arriving
//! while the probe runs is rejected as blocked rather than queued.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::{BreakerError, CallResult, ConfigResult};
use crate::stats::{ConfigEcho, StateChange, StatsSnapshot, EVENT_HISTORY_CAP, RECENT_CHANGES};
use crate::storage::StoredState;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation; failures are counted.
    Closed,
    /// Calls rejected without execution; a cooldown timer is running.
    Open,
    /// A single trial call is permitted to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// State guarded by the breaker's single mutual-exclusion domain.
struct Core {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    changes: VecDeque<StateChange>,
}

impl Core {
    /// Commit a transition, recording it exactly once. Returns the pair to
    /// hand to listeners, or `None` when the state already matched.
    fn transition(&mut self, to: CircuitState, at_ms: u64) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        if self.changes.len() == EVENT_HISTORY_CAP {
            self.changes.pop_front();
        }
        self.changes.push_back(StateChange { from, to, at_ms });
        Some((from, to))
    }
}

enum Admission {
    Allowed { probe: bool },
    Blocked,
}

/// Gate for one protected operation's health state.
///
/// Obtain breakers through a [`BreakerRegistry`] in application code; direct
/// construction is useful for tests and single-breaker embedding. Share via
/// `Arc`: callers holding a reference keep using a breaker even after the
/// registry drops it.
///
/// [`BreakerRegistry`]: crate::BreakerRegistry
pub struct Breaker<C: Clock = SystemClock> {
    config: BreakerConfig,
    core: Mutex<Core>,
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    blocked_calls: AtomicU64,
    last_success_ms: RwLock<Option<u64>>,
    last_failure_ms: RwLock<Option<u64>>,
    clock: C,
}

impl<C: Clock> fmt::Debug for Breaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("total_calls", &self.total_calls.load(Ordering::Acquire))
            .finish()
    }
}

impl Breaker<SystemClock> {
    /// Create a breaker using the system clock.
    pub fn new(config: BreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Breaker<C> {
    /// Create a breaker with a custom clock (deterministic in tests).
    ///
    /// When the configuration carries a state store, the persisted state
    /// seeds the breaker; a breaker restored as OPEN starts a fresh recovery
    /// window since monotonic time does not survive the previous owner.
    pub fn with_clock(config: BreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        let seeded = config.state_store.as_ref().and_then(|store| store.load(&config.name));
        let (state, failure_count) = match seeded {
            Some(stored) => {
                debug!(breaker = %config.name, state = %stored.state, "seeding breaker from state store");
                (stored.state, stored.failure_count)
            }
            None => (CircuitState::Closed, 0),
        };
        let opened_at = (state == CircuitState::Open).then(|| clock.now());

        Ok(Self {
            config,
            core: Mutex::new(Core {
                state,
                failure_count,
                opened_at,
                probe_in_flight: false,
                changes: VecDeque::new(),
            }),
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            blocked_calls: AtomicU64::new(0),
            last_success_ms: RwLock::new(None),
            last_failure_ms: RwLock::new(None),
            clock,
        })
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Execute a synchronous operation under breaker protection.
    ///
    /// Rejections surface as [`BreakerError::CircuitOpen`] without invoking
    /// the operation; operation failures come back unchanged as the source
    /// of [`BreakerError::Operation`].
    #[instrument(skip(self, operation), fields(breaker = %self.config.name))]
    pub fn call<F, T, E>(&self, operation: F) -> CallResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.begin()?;
        let result = operation();
        self.finish(permit, result)
    }

    /// Execute a suspend-capable operation under breaker protection.
    ///
    /// Same contract as [`Breaker::call`]; the call suspends only for as
    /// long as the operation itself runs. Dropping the returned future while
    /// a recovery probe is in flight releases the probe slot so the breaker
    /// cannot wedge in HALF_OPEN.
    #[instrument(skip(self, operation), fields(breaker = %self.config.name))]
    pub async fn call_async<F, Fut, T, E>(&self, operation: F) -> CallResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.begin()?;
        let result = operation().await;
        self.finish(permit, result)
    }

    /// Read-only state snapshot, taken under the transition lock.
    pub fn state(&self) -> CircuitState {
        self.core().state
    }

    /// Consistent copy of counters, timestamps and the most recent state
    /// changes.
    pub fn snapshot(&self) -> StatsSnapshot {
        let (state, failure_count, recent) = {
            let core = self.core();
            let skip = core.changes.len().saturating_sub(RECENT_CHANGES);
            (core.state, core.failure_count, core.changes.iter().skip(skip).copied().collect())
        };

        StatsSnapshot {
            name: self.config.name.clone(),
            state,
            failure_count,
            total_calls: self.total_calls.load(Ordering::Acquire),
            successful_calls: self.successful_calls.load(Ordering::Acquire),
            failed_calls: self.failed_calls.load(Ordering::Acquire),
            blocked_calls: self.blocked_calls.load(Ordering::Acquire),
            last_success_ms: self.read_time(&self.last_success_ms),
            last_failure_ms: self.read_time(&self.last_failure_ms),
            recent_state_changes: recent,
            config: ConfigEcho {
                failure_threshold: self.config.failure_threshold,
                recovery_timeout_ms: self.config.recovery_timeout.as_millis() as u64,
                retryable_failures: self.config.retryable.names(),
            },
        }
    }

    /// Force the breaker back to CLOSED with a zeroed failure count.
    ///
    /// Always succeeds; emits a state-change event iff the prior state
    /// differed.
    pub fn reset(&self) {
        let changed = {
            let mut core = self.core();
            let changed = core.transition(CircuitState::Closed, self.clock.epoch_millis());
            core.failure_count = 0;
            core.opened_at = None;
            core.probe_in_flight = false;
            changed
        };
        info!(breaker = %self.config.name, "circuit breaker manually reset to CLOSED");
        self.commit(changed, CircuitState::Closed, 0);
    }

    /// Operational override: force OPEN with a fresh recovery window,
    /// bypassing threshold and probe logic.
    pub fn force_open(&self) {
        let changed = {
            let mut core = self.core();
            let changed = core.transition(CircuitState::Open, self.clock.epoch_millis());
            core.opened_at = Some(self.clock.now());
            core.probe_in_flight = false;
            core.failure_count = 0;
            changed
        };
        warn!(breaker = %self.config.name, "circuit breaker manually forced OPEN");
        self.commit(changed, CircuitState::Open, 0);
    }

    // ------------------------------------------------------------------
    // Admission and outcome recording
    // ------------------------------------------------------------------

    /// Count the invocation and decide whether it may run.
    fn begin<E>(&self) -> Result<ProbePermit<'_, C>, BreakerError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let (admission, changed, state, count) = {
            let mut core = self.core();
            let (admission, changed) = match core.state {
                CircuitState::Closed => (Admission::Allowed { probe: false }, None),
                CircuitState::Open => {
                    // A missing opened_at (restored state) counts as elapsed.
                    let elapsed = core
                        .opened_at
                        .map(|at| self.clock.now().duration_since(at))
                        .unwrap_or(self.config.recovery_timeout);
                    if elapsed >= self.config.recovery_timeout {
                        let changed =
                            core.transition(CircuitState::HalfOpen, self.clock.epoch_millis());
                        core.probe_in_flight = true;
                        (Admission::Allowed { probe: true }, changed)
                    } else {
                        (Admission::Blocked, None)
                    }
                }
                CircuitState::HalfOpen => {
                    if core.probe_in_flight {
                        (Admission::Blocked, None)
                    } else {
                        core.probe_in_flight = true;
                        (Admission::Allowed { probe: true }, None)
                    }
                }
            };
            (admission, changed, core.state, core.failure_count)
        };

        if changed.is_some() {
            info!(breaker = %self.config.name, "circuit breaker half-open, probing recovery");
            self.commit(changed, state, count);
        }

        match admission {
            Admission::Allowed { probe } => Ok(ProbePermit { breaker: self, probe, armed: probe }),
            Admission::Blocked => {
                self.blocked_calls.fetch_add(1, Ordering::Relaxed);
                debug!(breaker = %self.config.name, "rejecting call, circuit is open");
                Err(BreakerError::CircuitOpen { name: self.config.name.clone() })
            }
        }
    }

    /// Record the operation outcome and map it to the caller-facing result.
    fn finish<T, E>(&self, permit: ProbePermit<'_, C>, result: Result<T, E>) -> CallResult<T, E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let probe = permit.probe;
        permit.complete();

        match result {
            Ok(value) => {
                self.on_success(probe);
                Ok(value)
            }
            Err(error) => {
                let kind = (self.config.classifier)(&error);
                let retryable = self.config.retryable.matches(kind);
                self.on_failure(probe, retryable);
                Err(BreakerError::Operation { source: error })
            }
        }
    }

    fn on_success(&self, probe: bool) {
        self.successful_calls.fetch_add(1, Ordering::Relaxed);
        self.write_time(&self.last_success_ms);

        let (changed, dirty, state, count) = {
            let mut core = self.core();
            let before = core.failure_count;
            let mut changed = None;
            if probe {
                core.probe_in_flight = false;
                if core.state == CircuitState::HalfOpen {
                    changed = core.transition(CircuitState::Closed, self.clock.epoch_millis());
                    core.failure_count = 0;
                    core.opened_at = None;
                }
            } else if core.state == CircuitState::Closed && self.config.reset_on_success {
                core.failure_count = 0;
            }
            let dirty = changed.is_some() || core.failure_count != before;
            (changed, dirty, core.state, core.failure_count)
        };

        if changed.is_some() {
            info!(breaker = %self.config.name, "recovery probe succeeded, circuit CLOSED");
        }
        if dirty {
            self.commit(changed, state, count);
        }
    }

    fn on_failure(&self, probe: bool, retryable: bool) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
        self.write_time(&self.last_failure_ms);

        if !retryable {
            debug!(breaker = %self.config.name, "failure kind not retryable, state unchanged");
            return;
        }

        let (changed, state, count) = {
            let mut core = self.core();
            let mut changed = None;
            match core.state {
                CircuitState::HalfOpen if probe => {
                    // A single failed probe re-opens with a fresh timer.
                    changed = core.transition(CircuitState::Open, self.clock.epoch_millis());
                    core.opened_at = Some(self.clock.now());
                    core.probe_in_flight = false;
                    core.failure_count = 0;
                }
                CircuitState::Closed => {
                    core.failure_count += 1;
                    if core.failure_count >= self.config.failure_threshold {
                        changed = core.transition(CircuitState::Open, self.clock.epoch_millis());
                        core.opened_at = Some(self.clock.now());
                        core.failure_count = 0;
                    }
                }
                // Stale completion after a concurrent force_open/reset.
                _ => {}
            }
            (changed, core.state, core.failure_count)
        };

        if let Some((from, _)) = changed {
            warn!(
                breaker = %self.config.name,
                from = %from,
                "circuit breaker opened"
            );
        }
        self.commit(changed, state, count);
    }

    /// Release an abandoned probe slot (future dropped before completion).
    fn release_probe(&self) {
        let mut core = self.core();
        if core.state == CircuitState::HalfOpen && core.probe_in_flight {
            core.probe_in_flight = false;
            debug!(breaker = %self.config.name, "recovery probe abandoned, slot released");
        }
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// Persist then notify after a possible transition. Listener panics are
    /// isolated so they cannot corrupt breaker state.
    fn commit(
        &self,
        changed: Option<(CircuitState, CircuitState)>,
        state: CircuitState,
        failure_count: u32,
    ) {
        if let Some(store) = &self.config.state_store {
            store.save(&self.config.name, &StoredState { state, failure_count });
        }
        self.after_transition(changed);
    }

    fn after_transition(&self, changed: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = changed else { return };
        for listener in &self.config.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(&self.config.name, from, to)));
            if outcome.is_err() {
                warn!(
                    breaker = %self.config.name,
                    "state listener panicked; transition already committed"
                );
            }
        }
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        match self.core.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(breaker = %self.config.name, "breaker core lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_time(&self, slot: &RwLock<Option<u64>>) {
        let now = self.clock.epoch_millis();
        match slot.write() {
            Ok(mut guard) => *guard = Some(now),
            Err(poisoned) => *poisoned.into_inner() = Some(now),
        }
    }

    fn read_time(&self, slot: &RwLock<Option<u64>>) -> Option<u64> {
        match slot.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Tracks an admitted call; releases the HALF_OPEN probe slot on drop if the
/// outcome was never recorded (panic, or a cancelled async call).
struct ProbePermit<'a, C: Clock> {
    breaker: &'a Breaker<C>,
    probe: bool,
    armed: bool,
}

impl<C: Clock> ProbePermit<'_, C> {
    fn complete(mut self) {
        self.armed = false;
    }
}

impl<C: Clock> Drop for ProbePermit<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::clock::MockClock;
    use crate::kind::{FailureKind, FailureKinds};
    use crate::storage::{MemoryStore, StateStore};

    #[derive(Debug)]
    struct TestError(FailureKind);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test failure ({:?})", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn kind_classifier() -> crate::kind::FailureClassifier {
        Arc::new(|error| {
            error.downcast_ref::<TestError>().map(|e| e.0).unwrap_or(FailureKind::Other)
        })
    }

    fn breaker(threshold: u32, timeout: Duration, clock: MockClock) -> Breaker<MockClock> {
        let config = BreakerConfig::builder("test")
            .failure_threshold(threshold)
            .recovery_timeout(timeout)
            .classifier(kind_classifier())
            .build()
            .unwrap();
        Breaker::with_clock(config, clock).unwrap()
    }

    fn fail(breaker: &Breaker<MockClock>) {
        let result: CallResult<(), TestError> =
            breaker.call(|| Err(TestError(FailureKind::Timeout)));
        assert!(result.is_err());
    }

    #[test]
    fn starts_closed_and_passes_calls_through() {
        let cb = breaker(3, Duration::from_secs(10), MockClock::new());
        assert_eq!(cb.state(), CircuitState::Closed);

        let result: CallResult<_, TestError> = cb.call(|| Ok(42));
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.snapshot().successful_calls, 1);
    }

    #[test]
    fn opens_at_threshold_and_zeroes_failure_count() {
        let cb = breaker(3, Duration::from_secs(10), MockClock::new());

        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 2);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().failure_count, 0, "threshold transition resets the count");
    }

    #[test]
    fn threshold_of_one_opens_immediately() {
        let cb = breaker(1, Duration::from_secs(10), MockClock::new());
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn open_rejects_without_invoking_operation() {
        let clock = MockClock::new();
        let cb = breaker(1, Duration::from_secs(10), clock.clone());
        fail(&cb);

        let invoked = AtomicU32::new(0);
        clock.advance(Duration::from_secs(5));
        let result: CallResult<(), TestError> = cb.call(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(matches!(result, Err(BreakerError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0, "blocked call must not run the operation");
        assert_eq!(cb.snapshot().blocked_calls, 1);
    }

    #[test]
    fn probe_success_closes_the_circuit() {
        let clock = MockClock::new();
        let cb = breaker(1, Duration::from_secs(10), clock.clone());
        fail(&cb);

        clock.advance(Duration::from_secs(11));
        let result: CallResult<_, TestError> = cb.call(|| Ok("recovered"));
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[test]
    fn probe_failure_reopens_with_fresh_timer() {
        let clock = MockClock::new();
        let cb = breaker(1, Duration::from_secs(10), clock.clone());
        fail(&cb);

        // Probe at t+11s fails: OPEN again, timer restarted at t+11s.
        clock.advance(Duration::from_secs(11));
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        // 5s later the fresh window has not elapsed.
        clock.advance(Duration::from_secs(5));
        let result: CallResult<(), TestError> = cb.call(|| Ok(()));
        assert!(matches!(result, Err(BreakerError::CircuitOpen { .. })));

        // 6 more seconds pass the restarted window.
        clock.advance(Duration::from_secs(6));
        let result: CallResult<(), TestError> = cb.call(|| Ok(()));
        assert!(result.is_ok());
    }

    #[test]
    fn second_caller_during_probe_is_blocked() {
        let clock = MockClock::new();
        let cb = breaker(1, Duration::from_secs(10), clock.clone());
        fail(&cb);
        clock.advance(Duration::from_secs(11));

        let ran = AtomicU32::new(0);
        let result: CallResult<(), TestError> = cb.call(|| {
            // While the probe is executing, a concurrent arrival is rejected.
            let inner: CallResult<(), TestError> = cb.call(|| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            assert!(matches!(inner, Err(BreakerError::CircuitOpen { .. })));
            Ok(())
        });

        assert!(result.is_ok());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(cb.snapshot().blocked_calls, 1);
    }

    #[test]
    fn non_retryable_failures_never_move_state() {
        let clock = MockClock::new();
        let config = BreakerConfig::builder("test")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(10))
            .retryable(FailureKinds::from_names(&["timeout"]))
            .classifier(kind_classifier())
            .build()
            .unwrap();
        let cb = Breaker::with_clock(config, clock).unwrap();

        for _ in 0..10 {
            let result: CallResult<(), TestError> =
                cb.call(|| Err(TestError(FailureKind::Protocol)));
            assert!(matches!(result, Err(BreakerError::Operation { .. })));
        }

        let stats = cb.snapshot();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.failed_calls, 10, "non-retryable failures still count as failed calls");
    }

    #[test]
    fn reset_returns_to_closed_from_any_state() {
        let cb = breaker(1, Duration::from_secs(10), MockClock::new());
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);

        // Resetting a closed breaker emits no extra event.
        let events_before = cb.snapshot().recent_state_changes.len();
        cb.reset();
        assert_eq!(cb.snapshot().recent_state_changes.len(), events_before);
    }

    #[test]
    fn force_open_bypasses_threshold() {
        let clock = MockClock::new();
        let cb = breaker(5, Duration::from_secs(10), clock.clone());
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);

        let result: CallResult<(), TestError> = cb.call(|| Ok(()));
        assert!(matches!(result, Err(BreakerError::CircuitOpen { .. })));
    }

    #[test]
    fn call_identity_holds_across_outcomes() {
        let clock = MockClock::new();
        let cb = breaker(2, Duration::from_secs(10), clock.clone());

        let _ = cb.call(|| Ok::<_, TestError>(1));
        fail(&cb);
        fail(&cb); // opens
        let blocked: CallResult<(), TestError> = cb.call(|| Ok(()));
        assert!(blocked.is_err());

        let stats = cb.snapshot();
        assert_eq!(
            stats.total_calls,
            stats.successful_calls + stats.failed_calls + stats.blocked_calls
        );
        assert_eq!(stats.total_calls, 4);
    }

    #[test]
    fn listeners_fire_in_order_and_panics_are_isolated() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);

        let config = BreakerConfig::builder("test")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(10))
            .classifier(kind_classifier())
            .listener(move |name, from, to| {
                first.lock().unwrap().push(format!("a:{name}:{from}->{to}"));
            })
            .listener(|_, _, _| panic!("listener bug"))
            .listener(move |name, from, to| {
                second.lock().unwrap().push(format!("b:{name}:{from}->{to}"));
            })
            .build()
            .unwrap();
        let cb = Breaker::with_clock(config, MockClock::new()).unwrap();

        fail(&cb);

        assert_eq!(cb.state(), CircuitState::Open, "panicking listener must not block transition");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), ["a:test:CLOSED->OPEN", "b:test:CLOSED->OPEN"]);
    }

    #[test]
    fn events_are_recorded_once_per_transition() {
        let clock = MockClock::new();
        let cb = breaker(1, Duration::from_secs(10), clock.clone());

        fail(&cb); // CLOSED -> OPEN
        clock.advance(Duration::from_secs(11));
        let _: CallResult<_, TestError> = cb.call(|| Ok(())); // OPEN -> HALF_OPEN -> CLOSED

        let changes = cb.snapshot().recent_state_changes;
        let pairs: Vec<_> = changes.iter().map(|c| (c.from, c.to)).collect();
        assert_eq!(
            pairs,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn success_clears_consecutive_failures_by_default() {
        let cb = breaker(3, Duration::from_secs(10), MockClock::new());
        fail(&cb);
        fail(&cb);
        let _ = cb.call(|| Ok::<_, TestError>(()));
        assert_eq!(cb.snapshot().failure_count, 0);

        // Two more failures stay under the threshold again.
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn state_store_is_written_through_and_seeds_restarts() {
        let store = Arc::new(MemoryStore::new());
        let config = BreakerConfig::builder("persisted")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(10))
            .classifier(kind_classifier())
            .state_store(store.clone())
            .build()
            .unwrap();
        let cb = Breaker::with_clock(config, MockClock::new()).unwrap();

        let result: CallResult<(), TestError> = cb.call(|| Err(TestError(FailureKind::Timeout)));
        assert!(result.is_err());
        assert_eq!(store.load("persisted").unwrap().state, CircuitState::Open);

        // A rebuilt breaker picks the persisted state up.
        let config = BreakerConfig::builder("persisted")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(10))
            .state_store(store)
            .build()
            .unwrap();
        let rebuilt = Breaker::with_clock(config, MockClock::new()).unwrap();
        assert_eq!(rebuilt.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn async_call_follows_the_same_contract() {
        let clock = MockClock::new();
        let cb = breaker(1, Duration::from_secs(10), clock.clone());

        let result: CallResult<(), TestError> =
            cb.call_async(|| async { Err(TestError(FailureKind::Timeout)) }).await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        let result: CallResult<(), TestError> = cb.call_async(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(BreakerError::CircuitOpen { .. })));

        clock.advance(Duration::from_secs(11));
        let result: CallResult<_, TestError> = cb.call_async(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn dropped_probe_releases_the_slot() {
        let clock = MockClock::new();
        let cb = Arc::new(breaker(1, Duration::from_secs(10), clock.clone()));
        fail(&cb);
        clock.advance(Duration::from_secs(11));

        // Start the probe but drop its future before it resolves.
        {
            let cb = Arc::clone(&cb);
            let probe = cb.call_async(|| std::future::pending::<Result<(), TestError>>());
            futures_drop(probe).await;
        }
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // The slot is free again: the next caller may probe.
        let result: CallResult<_, TestError> = cb.call_async(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    /// Poll a future once, then drop it.
    async fn futures_drop<F: Future>(fut: F) {
        let mut fut = Box::pin(fut);
        let poll_once = std::future::poll_fn(|cx| {
            let _ = fut.as_mut().poll(cx);
            std::task::Poll::Ready(())
        });
        poll_once.await;
        drop(fut);
    }
}
