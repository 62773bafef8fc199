//! Resilience layer shielding the orchestrator from unreliable agent calls.
//!
//! Planner calls go through [`ResilienceLayer::guarded_call`]: cache lookup,
//! breaker admission, the call itself, then accounting.
//! [`ResilienceLayer::guarded_call_fresh`] skips the lookup for callers that
//! need a new answer. Executor calls only feed the breaker's failure
//! accounting through [`ResilienceLayer::accounted_call`].

mod cache;
mod circuit_breaker;

pub use cache::ResponseCache;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::Metrics;

/// Why a guarded call produced no value.
#[derive(Debug, Error)]
pub enum GuardedError<E> {
    /// The breaker rejected the call; the collaborator was not contacted.
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error(transparent)]
    Failed(E),
}

pub struct ResilienceLayer {
    cache: ResponseCache,
    breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl ResilienceLayer {
    pub fn new(
        threshold: u32,
        cooldown: Duration,
        cache_ttl: Option<Duration>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache: ResponseCache::new(cache_ttl),
            breaker: CircuitBreaker::new(threshold, cooldown),
            metrics,
        }
    }

    /// Serve `(model, request)` from cache or run `compute` behind the breaker.
    ///
    /// Cache hits never touch the breaker. Only successful results are cached.
    pub async fn guarded_call<F, Fut, E>(
        &self,
        model: &str,
        request: &str,
        compute: F,
    ) -> Result<String, GuardedError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let key = ResponseCache::cache_key(model, request);
        if let Some(hit) = self.cache.get(&key) {
            debug!(model, "Planner response served from cache");
            self.metrics.record_cache_hit();
            return Ok(hit);
        }
        self.admit(model, key, compute).await
    }

    /// Like [`guarded_call`](Self::guarded_call) but always runs `compute`.
    ///
    /// The result still replaces the cached entry on success.
    pub async fn guarded_call_fresh<F, Fut, E>(
        &self,
        model: &str,
        request: &str,
        compute: F,
    ) -> Result<String, GuardedError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let key = ResponseCache::cache_key(model, request);
        self.admit(model, key, compute).await
    }

    async fn admit<F, Fut, E>(
        &self,
        model: &str,
        key: String,
        compute: F,
    ) -> Result<String, GuardedError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let Some(permit) = self.breaker.try_acquire() else {
            warn!(model, "Planner call rejected by open circuit breaker");
            return Err(GuardedError::CircuitOpen);
        };

        self.metrics.record_llm_call();
        match compute().await {
            Ok(value) => {
                permit.success();
                self.cache.put(key, value.clone());
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(GuardedError::Failed(e))
            }
        }
    }

    /// Run `call` and feed its outcome into the breaker without gating it.
    pub async fn accounted_call<F, Fut, T, E>(&self, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = call().await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}
