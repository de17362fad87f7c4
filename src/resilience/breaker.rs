//! Circuit breaker for one downstream dependency.
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ─────────────────────────────────► OPEN
//!     ▲                                       │  ▲
//!     │ successes >= success_threshold        │  │ any failure
//!     │                        call at/after  ▼  │
//!     └──────────────────────── timeout ─── HALF_OPEN
//! ```
//!
//! The OPEN → HALF_OPEN transition is lazy: it happens when a call is
//! attempted after the timeout, never on a timer. Each state change bumps a
//! generation counter; outcomes of calls that started in an earlier
//! generation are ignored.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::telemetry;
use crate::{Result, SkjoldError};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through normally
    Closed,
    /// Calls are rejected without running
    Open,
    /// Trial calls are let through to probe recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for one breaker. There are no defaults; every dependency
/// states its own tolerance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit (0 is treated as 1).
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it (0 is treated as 1).
    pub success_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed.
    pub timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            timeout,
        }
    }
}

/// Snapshot of a breaker's state.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub dependency: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<Instant>,
    pub next_attempt_allowed_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    next_attempt_allowed_at: Option<Instant>,
    generation: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            next_attempt_allowed_at: None,
            generation: 0,
        }
    }
}

/// Guards calls to a single dependency.
///
/// Create one per downstream (e.g. one per AI provider) so an outage in one
/// does not suppress calls to another.
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            ..config
        };
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. Does not perform the lazy OPEN → HALF_OPEN transition.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            dependency: self.dependency.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            next_attempt_allowed_at: inner.next_attempt_allowed_at,
        }
    }

    /// Force the breaker back to CLOSED with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let generation = inner.generation.wrapping_add(1);
        if inner.state != CircuitState::Closed {
            info!(dependency = %self.dependency, "circuit breaker reset");
        }
        *inner = BreakerState {
            generation,
            ..BreakerState::closed()
        };
    }

    /// Run `operation` through the breaker.
    ///
    /// While OPEN and before the timeout has elapsed, returns
    /// [`SkjoldError::CircuitOpen`] without running `operation`. Otherwise
    /// the operation's own result is returned unchanged after the outcome
    /// is recorded.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let generation = self.admit()?;
        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(generation),
            Err(_) => self.record_failure(generation),
        }
        result
    }

    /// Decide whether a call may proceed; returns the generation it runs in.
    fn admit(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let now = Instant::now();
            let next_attempt = inner.next_attempt_allowed_at;
            match next_attempt {
                Some(at) if now < at => {
                    metrics::counter!(telemetry::BREAKER_REJECTIONS_TOTAL,
                        "dependency" => self.dependency.clone(),
                    )
                    .increment(1);
                    return Err(SkjoldError::CircuitOpen {
                        dependency: self.dependency.clone(),
                        retry_in: at - now,
                    });
                }
                _ => self.transition(&mut inner, CircuitState::HalfOpen),
            }
        }
        Ok(inner.generation)
    }

    fn record_success(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            // a failed trial call re-opens immediately
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation = inner.generation.wrapping_add(1);
        inner.success_count = 0;
        match to {
            CircuitState::Open => {
                inner.next_attempt_allowed_at = Some(Instant::now() + self.config.timeout);
                warn!(
                    dependency = %self.dependency,
                    %from,
                    failures = inner.failure_count,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                info!(dependency = %self.dependency, %from, "circuit breaker half-open, probing");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.next_attempt_allowed_at = None;
                info!(dependency = %self.dependency, %from, "circuit breaker closed");
            }
        }
        metrics::counter!(telemetry::BREAKER_TRANSITIONS_TOTAL,
            "dependency" => self.dependency.clone(),
            "state" => to.as_str(),
        )
        .increment(1);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.dependency)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}
