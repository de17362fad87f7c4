//! Skjold - retry, circuit breaking and caching for unreliable upstreams
//!
//! This crate guards outbound calls to services that fail in ordinary ways
//! (timeouts, rate limits, 5xx bursts, outages). It provides three
//! independent primitives and a façade composing them:
//!
//! - [`Cache`]: bounded in-memory store with per-item TTL and LRU eviction
//! - [`execute_with_retry()`] / [`Retrier`]: exponential backoff with jitter
//!   and error classification
//! - [`CircuitBreaker`]: fails fast while a dependency is unhealthy
//! - [`Gateway`]: cache → breaker → retry → call
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use skjold::{CircuitBreakerConfig, RetryConfig, Skjold};
//!
//! #[tokio::main]
//! async fn main() -> skjold::Result<()> {
//!     let gateway = Skjold::builder()
//!         .retry(RetryConfig::new().max_attempts(4))
//!         .dependency("openai", CircuitBreakerConfig::new(5, 2, Duration::from_secs(60)))
//!         .build()?;
//!
//!     let client = reqwest::Client::builder()
//!         .timeout(Duration::from_secs(20))
//!         .build()?;
//!
//!     let key = skjold::cache_key("openai", "models", "list");
//!     let body: String = gateway
//!         .call("openai", &key, None, || async {
//!             let response = client.get("https://api.openai.com/v1/models").send().await?;
//!             let response = skjold::http::error_for_status(response).await?;
//!             Ok::<_, skjold::SkjoldError>(response.text().await?)
//!         })
//!         .await?;
//!
//!     println!("{} bytes", body.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod resilience;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{Cache, CacheConfig, CacheMetrics, CacheStats, cache_key};
pub use config::Config;
pub use error::{Result, SkjoldError};
pub use gateway::{Gateway, Skjold, SkjoldBuilder};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, Retrier, RetryConfig,
    RetryOutcome, RetryTask, execute_with_retry, with_retry,
};
