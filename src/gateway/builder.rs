//! Builder for configuring gateway instances

use std::collections::HashMap;
use std::sync::Arc;

use super::Gateway;
use crate::cache::{Cache, CacheConfig};
use crate::config::Config;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, Retrier, RetryConfig};
use crate::{Result, SkjoldError};

/// Main entry point for creating gateway instances.
pub struct Skjold;

impl Skjold {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> SkjoldBuilder {
        SkjoldBuilder::new()
    }
}

/// Builder for configuring gateway instances.
pub struct SkjoldBuilder {
    retry: RetryConfig,
    cache: CacheConfig,
    shared_cache: Option<Arc<Cache>>,
    dependencies: Vec<(String, CircuitBreakerConfig)>,
}

impl SkjoldBuilder {
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            shared_cache: None,
            dependencies: Vec::new(),
        }
    }

    /// Default retry policy for every call.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Configure the gateway's own cache.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Use an existing cache instead of creating one.
    ///
    /// Overrides [`cache()`](Self::cache).
    pub fn shared_cache(mut self, cache: Arc<Cache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    /// Register a dependency guarded by its own circuit breaker.
    pub fn dependency(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.dependencies.push((name.into(), config));
        self
    }

    /// Apply retry, cache and breaker settings from a loaded [`Config`].
    pub fn with_config(mut self, config: &Config) -> Self {
        self.retry = RetryConfig::from(&config.retry);
        self.cache = CacheConfig::from(&config.cache);
        for (name, breaker) in &config.breakers {
            self.dependencies
                .push((name.clone(), CircuitBreakerConfig::from(breaker)));
        }
        self
    }

    /// Build the gateway.
    ///
    /// Fails when no dependency is registered or a name is registered twice.
    pub fn build(self) -> Result<Gateway> {
        if self.dependencies.is_empty() {
            return Err(SkjoldError::Configuration(
                "no dependency registered; call .dependency() at least once".to_string(),
            ));
        }

        let mut breakers = HashMap::with_capacity(self.dependencies.len());
        for (name, config) in self.dependencies {
            if breakers.contains_key(&name) {
                return Err(SkjoldError::Configuration(format!(
                    "dependency '{name}' registered more than once"
                )));
            }
            let breaker = Arc::new(CircuitBreaker::new(name.clone(), config));
            breakers.insert(name, breaker);
        }

        let cache = self
            .shared_cache
            .unwrap_or_else(|| Arc::new(Cache::new(self.cache)));

        Ok(Gateway::new(cache, Retrier::new(self.retry), breakers))
    }
}

impl Default for SkjoldBuilder {
    fn default() -> Self {
        Self::new()
    }
}
