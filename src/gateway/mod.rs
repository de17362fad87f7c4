//! Resilient call façade.
//!
//! [`Gateway`] composes the three primitives for one logical call:
//!
//! ```text
//! caller ─► Cache::get ─ hit ─────────────────────────────────────► value
//!                └ miss ─► CircuitBreaker::execute ─► with_retry ─► operation
//!                                                         │
//!                              Cache::set ◄─── success ◄──┘
//! ```
//!
//! A cache hit bypasses the breaker and retry entirely. Errors, including
//! circuit-open rejections, are never cached.

mod builder;

pub use builder::{Skjold, SkjoldBuilder};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::cache::Cache;
use crate::resilience::{CircuitBreaker, CircuitBreakerStats, Retrier};
use crate::{Result, SkjoldError};

/// Cache-first, breaker-guarded, retrying executor.
///
/// Holds one [`CircuitBreaker`] per registered dependency. Build it with
/// [`Skjold::builder()`].
pub struct Gateway {
    cache: Arc<Cache>,
    retrier: Retrier,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl Gateway {
    pub(crate) fn new(
        cache: Arc<Cache>,
        retrier: Retrier,
        breakers: HashMap<String, Arc<CircuitBreaker>>,
    ) -> Self {
        Self {
            cache,
            retrier,
            breakers,
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Breaker guarding `dependency`, if registered.
    pub fn breaker(&self, dependency: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(dependency)
    }

    /// Snapshots of every breaker, ordered by dependency name.
    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        stats
    }

    /// Serve `key` from the cache, or compute it through the dependency's
    /// breaker and retry policy and cache the result.
    ///
    /// `ttl` defaults to the cache's configured default.
    pub async fn call<T, F, Fut>(
        &self,
        dependency: &str,
        key: &str,
        ttl: Option<Duration>,
        operation: F,
    ) -> Result<T>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.cache.get::<T>(key) {
            debug!(dependency, key, "served from cache");
            return Ok(value);
        }
        let value = self.call_uncached(dependency, operation).await?;
        self.cache.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Run `operation` through the dependency's breaker and retry policy,
    /// without touching the cache.
    pub async fn call_uncached<T, F, Fut>(&self, dependency: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self
            .breaker(dependency)
            .ok_or_else(|| SkjoldError::UnknownDependency(dependency.to_owned()))?;
        breaker
            .execute(|| self.retrier.with_retry(dependency, operation))
            .await
    }
}
