//! Retry configuration, delay calculation, and the retry engine.
//!
//! [`execute_with_retry()`] is the single primitive: it runs one operation
//! until it succeeds, fails permanently, or exhausts the attempt budget,
//! and reports what happened as a [`RetryOutcome`]. [`with_retry()`] is the
//! `Result`-returning form for simpler call sites. [`Retrier`] carries a
//! default config so the engine can be injected, and adds concurrent and
//! series batch modes on top of the same primitive.

use std::future::Future;
use std::time::Duration;

use futures_util::future::{BoxFuture, join_all};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DEFAULT_RETRYABLE_PHRASES, DEFAULT_RETRYABLE_STATUSES, contains_phrase};
use crate::telemetry;
use crate::{Result, SkjoldError};

/// Maximum perturbation applied by jitter, as a fraction of the delay.
const JITTER_RATIO: f64 = 0.25;

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff with optional jitter. Start from the defaults
/// and override what a call site needs:
///
/// ```rust
/// # use skjold::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(200))
///     .jitter(false);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry; 0 is treated as 1. Default: 3.
    pub max_attempts: u32,
    /// Delay before the first retry. Default: 1s.
    pub base_delay: Duration,
    /// Cap on any single delay. Default: 30s.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays. Default: 2.
    pub backoff_factor: f64,
    /// Whether to perturb delays by up to ±25%. Default: true.
    pub jitter: bool,
    /// Message fragments that make an untyped error retryable.
    pub retryable_phrases: Vec<String>,
    /// HTTP statuses that make an `Api` error retryable.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
            retryable_phrases: DEFAULT_RETRYABLE_PHRASES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the exponential growth factor.
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Replace the retryable message fragments.
    pub fn retryable_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_phrases = phrases.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the retryable HTTP status codes.
    pub fn retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Effective attempt budget (never below 1).
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether `err` should be retried under this policy.
    ///
    /// Transport failures always retry. Errors carrying an HTTP status
    /// (`Api`, `RateLimited` as 429, `AuthenticationFailed` as 401) retry
    /// only when that status is listed in `retryable_statuses`. Untyped
    /// `Http` errors are matched against `retryable_phrases`. Everything
    /// else is permanent.
    pub fn is_retryable(&self, err: &SkjoldError) -> bool {
        match err {
            SkjoldError::Timeout(_) | SkjoldError::Network(_) => true,
            SkjoldError::Api { .. }
            | SkjoldError::RateLimited { .. }
            | SkjoldError::AuthenticationFailed => err
                .status()
                .is_some_and(|status| self.retryable_statuses.contains(&status)),
            SkjoldError::Http(message) => contains_phrase(message, &self.retryable_phrases),
            SkjoldError::Json(_)
            | SkjoldError::InvalidInput(_)
            | SkjoldError::CircuitOpen { .. }
            | SkjoldError::UnknownDependency(_)
            | SkjoldError::Configuration(_) => false,
        }
    }

    /// Backoff delay after the given 1-based attempt failed, without jitter.
    ///
    /// `base_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        if capped.is_finite() && capped > 0.0 {
            Duration::from_millis(capped as u64)
        } else if capped.is_nan() || capped <= 0.0 {
            Duration::ZERO
        } else {
            self.max_delay
        }
    }

    /// Delay actually slept after the given attempt failed.
    ///
    /// A provider `retry_after` hint replaces the computed backoff (still
    /// capped at `max_delay`); otherwise jitter is applied when enabled.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.min(self.max_delay),
            None if self.jitter => apply_jitter(self.delay_for_attempt(attempt), rand::random()),
            None => self.delay_for_attempt(attempt),
        }
    }
}

/// Perturb `delay` by `(sample - 0.5) * 2 * 25%`, floored to whole milliseconds.
///
/// `sample` is expected in `[0, 1)`.
pub fn apply_jitter(delay: Duration, sample: f64) -> Duration {
    let millis = delay.as_millis() as f64;
    let jittered = millis + (sample - 0.5) * 2.0 * (millis * JITTER_RATIO);
    Duration::from_millis(jittered.max(0.0).floor() as u64)
}

/// Result of one retry sequence.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final value, or the last error observed.
    pub result: Result<T>,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Wall-clock time spent, including delays.
    pub elapsed: Duration,
}

impl<T> RetryOutcome<T> {
    /// Whether the sequence ended with a value.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The value, if the sequence succeeded.
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// The last error, if the sequence failed.
    pub fn error(&self) -> Option<&SkjoldError> {
        self.result.as_ref().err()
    }

    /// Discard the bookkeeping and keep the result.
    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

// ============================================================================
// Retry primitive
// ============================================================================

/// Execute an async operation with retry logic.
///
/// Retries errors that `config` classifies as retryable, up to
/// `config.max_attempts` attempts, sleeping between attempts. Permanent
/// errors return immediately without consuming the remaining budget.
pub async fn execute_with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation: &str,
    f: F,
) -> RetryOutcome<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_attempts = config.attempt_budget();
    let mut attempt = 0;

    let (result, status) = loop {
        attempt += 1;
        debug!(operation, attempt, max_attempts, "attempting operation");

        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "operation succeeded after retry");
                }
                break (Ok(value), "ok");
            }
            Err(e) if !config.is_retryable(&e) => {
                warn!(operation, attempt, error = %e, "permanent error, not retrying");
                break (Err(e), "permanent");
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    "retries exhausted"
                );
                break (Err(e), "exhausted");
            }
            Err(e) => {
                let delay = config.effective_delay(attempt, e.retry_after());
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient error"
                );
                metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => operation.to_owned())
                    .increment(1);
                tokio::time::sleep(delay).await;
            }
        }
    };

    let elapsed = start.elapsed();
    metrics::counter!(telemetry::RETRY_OUTCOMES_TOTAL,
        "operation" => operation.to_owned(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::RETRY_DURATION_SECONDS, "operation" => operation.to_owned())
        .record(elapsed.as_secs_f64());

    RetryOutcome {
        result,
        attempts: attempt,
        elapsed,
    }
}

/// Like [`execute_with_retry()`], but returns the value or the last error.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    execute_with_retry(config, operation, f)
        .await
        .into_result()
}

// ============================================================================
// Batch tasks
// ============================================================================

type BoxedOperation<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// A named operation queued for batch execution.
pub struct RetryTask<T> {
    name: String,
    operation: BoxedOperation<T>,
    config: Option<RetryConfig>,
    continue_on_error: bool,
}

impl<T> RetryTask<T> {
    pub fn new<F, Fut>(name: impl Into<String>, operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            operation: Box::new(move || -> BoxFuture<'static, Result<T>> {
                Box::pin(operation())
            }),
            config: None,
            continue_on_error: false,
        }
    }

    /// Use this config instead of the [`Retrier`]'s default.
    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// In series mode, keep going after this task fails. Default: false.
    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Retrier
// ============================================================================

/// Retry engine with a default policy, for injection into callers.
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `f` under the default policy.
    pub async fn execute_with_retry<F, Fut, T>(&self, operation: &str, f: F) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        execute_with_retry(&self.config, operation, f).await
    }

    /// Run `f` under the default policy, returning the value or last error.
    pub async fn with_retry<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_retry(&self.config, operation, f).await
    }

    /// Run every task concurrently; one outcome per task, in input order.
    pub async fn execute_concurrent<T>(&self, tasks: Vec<RetryTask<T>>) -> Vec<RetryOutcome<T>> {
        join_all(tasks.iter().map(|task| self.run_task(task))).await
    }

    /// Run tasks one after another.
    ///
    /// A failed task stops the sequence unless it was marked
    /// [`continue_on_error`](RetryTask::continue_on_error). Outcomes are
    /// returned for the tasks that ran.
    pub async fn execute_series<T>(&self, tasks: Vec<RetryTask<T>>) -> Vec<RetryOutcome<T>> {
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let outcome = self.run_task(task).await;
            let halt = !outcome.is_success() && !task.continue_on_error;
            outcomes.push(outcome);
            if halt {
                info!(
                    operation = %task.name,
                    skipped = tasks.len() - outcomes.len(),
                    "series halted after failure"
                );
                break;
            }
        }
        outcomes
    }

    async fn run_task<T>(&self, task: &RetryTask<T>) -> RetryOutcome<T> {
        let config = task.config.as_ref().unwrap_or(&self.config);
        execute_with_retry(config, &task.name, || (task.operation)()).await
    }
}
