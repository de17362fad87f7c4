//! Telemetry metric name constants.
//!
//! Centralised metric names for skjold operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `skjold_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `operation`: name given to the retried operation
//! - `dependency`: downstream guarded by a circuit breaker
//! - `namespace`: cache key prefix up to the first `:`
//! - `status`: outcome label, documented per metric

/// Total retries scheduled (not counting the initial attempt).
///
/// Labels: `operation`.
pub const RETRIES_TOTAL: &str = "skjold_retries_total";

/// Total finished retry sequences.
///
/// Labels: `operation`, `status` ("ok" | "exhausted" | "permanent").
pub const RETRY_OUTCOMES_TOTAL: &str = "skjold_retry_outcomes_total";

/// Wall-clock duration of a whole retry sequence in seconds.
///
/// Labels: `operation`.
pub const RETRY_DURATION_SECONDS: &str = "skjold_retry_duration_seconds";

/// Total circuit breaker state transitions.
///
/// Labels: `dependency`, `state` ("closed" | "open" | "half_open").
pub const BREAKER_TRANSITIONS_TOTAL: &str = "skjold_breaker_transitions_total";

/// Total calls rejected by an open circuit breaker.
///
/// Labels: `dependency`.
pub const BREAKER_REJECTIONS_TOTAL: &str = "skjold_breaker_rejections_total";

/// Total cache hits.
///
/// Labels: `namespace`.
pub const CACHE_HITS_TOTAL: &str = "skjold_cache_hits_total";

/// Total cache misses, including reads of expired entries.
///
/// Labels: `namespace`.
pub const CACHE_MISSES_TOTAL: &str = "skjold_cache_misses_total";

/// Total capacity evictions.
///
/// Labels: `namespace`.
pub const CACHE_EVICTIONS_TOTAL: &str = "skjold_cache_evictions_total";
