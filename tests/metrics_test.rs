//! Tests for metrics emission.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::time::Duration;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use skjold::telemetry;
use skjold::{
    Cache, CacheConfig, CircuitBreaker, CircuitBreakerConfig, Result, RetryConfig, SkjoldError,
    execute_with_retry,
};

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Sum counter values for a metric name carrying the given label value.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .base_delay(Duration::from_millis(1))
        .jitter(false)
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn retry_records_retries_and_outcome() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let outcome = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let attempts = std::sync::atomic::AtomicU32::new(0);
                execute_with_retry(&fast_retry(), "youtube.metadata", || async {
                    let n = attempts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if n < 2 {
                        Err(SkjoldError::Timeout("slow".into()))
                    } else {
                        Ok(n)
                    }
                })
                .await
            })
        })
    });
    assert!(outcome.is_success());

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 2);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::RETRY_OUTCOMES_TOTAL, "status", "ok"),
        1
    );
    assert!(
        has_histogram(&snapshot, telemetry::RETRY_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn permanent_error_records_no_retry() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let outcome = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                execute_with_retry(&fast_retry(), "openai.chat", || async {
                    Err::<(), _>(SkjoldError::AuthenticationFailed)
                })
                .await
            })
        })
    });
    assert_eq!(outcome.attempts, 1);

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 0);
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::RETRY_OUTCOMES_TOTAL,
            "status",
            "permanent"
        ),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn breaker_records_transitions_and_rejections() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let breaker = CircuitBreaker::new(
                    "openai",
                    CircuitBreakerConfig::new(1, 1, Duration::from_secs(60)),
                );
                let fail = || async { Err::<(), _>(SkjoldError::Network("reset".into())) };
                let _: Result<()> = breaker.execute(fail).await;
                let _: Result<()> = breaker.execute(fail).await;
                let _: Result<()> = breaker.execute(fail).await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::BREAKER_TRANSITIONS_TOTAL,
            "state",
            "open"
        ),
        1
    );
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::BREAKER_REJECTIONS_TOTAL,
            "dependency",
            "openai"
        ),
        2
    );
}

#[test]
fn cache_records_hits_misses_and_evictions_by_namespace() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let cache = Cache::new(CacheConfig::new().max_entries(1));
        cache.set("video:meta:1", 1u32, None);
        let _ = cache.get::<u32>("video:meta:1");
        let _ = cache.get::<u32>("ai:summary:1");
        cache.set("ai:summary:1", 2u32, None);
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::CACHE_HITS_TOTAL, "namespace", "video"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CACHE_MISSES_TOTAL, "namespace", "ai"),
        1
    );
    // the evicted entry's namespace is reported
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::CACHE_EVICTIONS_TOTAL,
            "namespace",
            "video"
        ),
        1
    );
}

#[test]
fn cache_with_metrics_disabled_emits_nothing() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let cache = Cache::new(CacheConfig::new().metrics(false));
        cache.set("video:meta:1", 1u32, None);
        let _ = cache.get::<u32>("video:meta:1");
        let _ = cache.get::<u32>("video:meta:2");
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 0);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 0);
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let outcome = execute_with_retry(&fast_retry(), "noop", || async { Ok::<_, SkjoldError>(1) }).await;
    assert!(outcome.is_success());
}
