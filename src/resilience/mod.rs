//! Failure handling primitives: retry with backoff and circuit breaking.
//!
//! The two are independent; [`Gateway`](crate::Gateway) composes them as
//! breaker → retry → call.

pub mod breaker;
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use retry::{
    Retrier, RetryConfig, RetryOutcome, RetryTask, apply_jitter, execute_with_retry, with_retry,
};
