//! Guarded callables
//!
//! Where the registry and breaker expose `call(operation)`, many call sites
//! want the inverse ergonomics: bind a function to a named breaker once and
//! invoke the bound value like the original function. [`Guarded`] is that
//! bound value; it closes over an `Arc` to the breaker, so it stays valid
//! even if the breaker is later removed from the registry.

use std::future::Future;
use std::sync::Arc;

use crate::breaker::Breaker;
use crate::clock::Clock;
use crate::config::BreakerConfig;
use crate::error::{CallResult, RegistryError};
use crate::registry::BreakerRegistry;

/// A callable bound to a breaker.
///
/// `F` takes a single argument (use a tuple or `()` for other arities) and
/// either returns `Result` directly or a `Future` of one; `call` and
/// `call_async` pick the matching calling convention.
pub struct Guarded<C: Clock, F> {
    breaker: Arc<Breaker<C>>,
    inner: F,
}

impl<C: Clock, F> std::fmt::Debug for Guarded<C, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guarded").finish_non_exhaustive()
    }
}

impl<C: Clock, F> Guarded<C, F> {
    /// Bind `inner` to an explicitly supplied breaker.
    pub fn new(breaker: Arc<Breaker<C>>, inner: F) -> Self {
        Self { breaker, inner }
    }

    /// The breaker this callable routes through.
    pub fn breaker(&self) -> &Arc<Breaker<C>> {
        &self.breaker
    }

    /// Invoke the bound synchronous function under breaker protection.
    pub fn call<A, T, E>(&self, arg: A) -> CallResult<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.breaker.call(|| (self.inner)(arg))
    }

    /// Invoke the bound suspend-capable function under breaker protection.
    pub async fn call_async<A, Fut, T, E>(&self, arg: A) -> CallResult<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.breaker.call_async(|| (self.inner)(arg)).await
    }
}

impl<C: Clock + Clone> BreakerRegistry<C> {
    /// Bind `inner` to the already-registered breaker `name`.
    ///
    /// Fails with [`RegistryError::NotFound`] when no such breaker exists;
    /// this is the auto-registration-disabled flavor.
    pub fn wrap<F>(&self, name: &str, inner: F) -> Result<Guarded<C, F>, RegistryError> {
        let breaker = self.get(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(Guarded { breaker, inner })
    }

    /// Bind `inner` to the breaker named by `config`, registering it with
    /// those settings when absent.
    ///
    /// When the name is already registered the existing breaker wins and
    /// `config` is discarded, so repeated wrapping is cheap and idempotent.
    pub fn wrap_or_register<F>(
        &self,
        config: BreakerConfig,
        inner: F,
    ) -> Result<Guarded<C, F>, RegistryError> {
        let breaker = self.get_or_register(config)?;
        Ok(Guarded { breaker, inner })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::breaker::CircuitState;
    use crate::error::BreakerError;

    fn config(name: &str) -> BreakerConfig {
        BreakerConfig::builder(name)
            .failure_threshold(2)
            .recovery_timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn parse(input: &str) -> Result<i64, std::num::ParseIntError> {
        input.parse()
    }

    #[test]
    fn wrap_requires_registration() {
        let registry = BreakerRegistry::new();
        let err = registry.wrap("missing", parse).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(name) if name == "missing"));
    }

    #[test]
    fn wrapped_function_keeps_its_calling_convention() {
        let registry = BreakerRegistry::new();
        registry.register(config("parser")).unwrap();

        let guarded = registry.wrap("parser", parse).unwrap();
        assert_eq!(guarded.call("41").unwrap(), 41);

        let err = guarded.call("not a number").unwrap_err();
        assert!(matches!(err, BreakerError::Operation { .. }));
    }

    #[test]
    fn wrap_or_register_auto_registers_once() {
        let registry = BreakerRegistry::new();
        let first = registry.wrap_or_register(config("parser"), parse).unwrap();
        let second = registry.wrap_or_register(config("parser"), parse).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(first.breaker(), second.breaker()));
    }

    #[test]
    fn guards_on_one_name_share_breaker_state() {
        let registry = BreakerRegistry::new();
        let failing = registry.wrap_or_register(config("svc"), parse).unwrap();
        let healthy = registry
            .wrap("svc", |(): ()| Ok::<_, std::num::ParseIntError>("fine"))
            .unwrap();

        let _ = failing.call("x");
        let _ = failing.call("y");
        assert_eq!(failing.breaker().state(), CircuitState::Open);

        // The sibling guard is rejected because the shared circuit is open.
        let err = healthy.call(()).unwrap_err();
        assert!(err.is_rejection());
    }

    #[test]
    fn guarded_survives_registry_removal() {
        let registry = BreakerRegistry::new();
        let guarded = registry.wrap_or_register(config("svc"), parse).unwrap();
        assert!(registry.remove("svc"));

        assert_eq!(guarded.call("7").unwrap(), 7);
    }

    #[tokio::test]
    async fn async_guarded_calls_route_through_the_breaker() {
        let registry = BreakerRegistry::new();
        let guarded = registry
            .wrap_or_register(config("io"), |input: &'static str| async move {
                input.parse::<i64>()
            })
            .unwrap();

        assert_eq!(guarded.call_async("12").await.unwrap(), 12);

        let _ = guarded.call_async("bad").await;
        let _ = guarded.call_async("bad").await;
        assert_eq!(guarded.breaker().state(), CircuitState::Open);

        let err = guarded.call_async("12").await.unwrap_err();
        assert!(err.is_rejection());
    }
}
