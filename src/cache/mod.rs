//! Bounded in-memory cache with TTL expiry and LRU eviction.
//!
//! [`Cache`] is a single shared namespace of string keys mapping to opaque,
//! typed values. Callers namespace their keys by operation kind and
//! identifier (see [`cache_key()`]), e.g. `"video:metadata:dQw4w9WgXcQ"`.
//!
//! # Architecture
//!
//! Items live in an unbounded [`LruCache`] behind one lock, which keeps the
//! key index and the access order in step. Capacity is enforced here rather
//! than by the `lru` crate so that every eviction is counted.
//!
//! Expiry is lazy: a read of an expired item removes it and counts as a
//! miss. [`Cache::cleanup()`] is a throttled batch sweep that only exists to
//! reclaim memory early; it runs opportunistically before an eviction and
//! can be driven by a timer via [`Cache::spawn_cleanup_task()`].
//!
//! The cache never fails. Size estimates (used for reporting only) fall
//! back to [`DEFAULT_SIZE_ESTIMATE`] when a value cannot be serialized.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::telemetry;

/// Size reported for values that cannot be serialized.
pub const DEFAULT_SIZE_ESTIMATE: usize = 1024;

/// Configuration for the cache.
///
/// ```rust
/// # use skjold::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(500)
///     .default_ttl(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of live entries. Default: 200. Values below 1 are
    /// treated as 1.
    pub max_entries: usize,
    /// Lifetime applied when `set` is called without a TTL. Default: 5 minutes.
    pub default_ttl: Duration,
    /// Minimum time between two expiry sweeps. Default: 60s.
    pub cleanup_interval: Duration,
    /// Whether hit/miss/eviction counters are tracked. Default: true.
    pub metrics_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            default_ttl: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            metrics_enabled: true,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the default time-to-live.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the minimum interval between expiry sweeps.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Enable or disable hit/miss/eviction accounting.
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}

/// Running hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    /// `hits / (hits + misses)`, or 0 before any read.
    pub hit_rate: f64,
}

impl CacheMetrics {
    fn new(counters: Counters, size: usize) -> Self {
        let reads = counters.hits + counters.misses;
        let hit_rate = if reads == 0 {
            0.0
        } else {
            counters.hits as f64 / reads as f64
        };
        Self {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            size,
            hit_rate,
        }
    }
}

/// Point-in-time view of the cache contents.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub default_ttl_ms: u64,
    /// Sum of per-item size estimates.
    pub estimated_bytes: usize,
    /// Sum of per-item hit counts.
    pub total_item_hits: u64,
    /// Age of the oldest stored item, expired or not.
    pub oldest_entry_age_ms: Option<u64>,
    pub metrics: CacheMetrics,
}

/// Build a namespaced key of the form `service:namespace:id`.
pub fn cache_key(service: &str, namespace: &str, id: &str) -> String {
    format!("{service}:{namespace}:{id}")
}

struct CacheItem {
    data: Arc<dyn Any + Send + Sync>,
    created_at: Instant,
    ttl: Duration,
    hit_count: u64,
    size_estimate: usize,
}

impl CacheItem {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

struct CacheState {
    entries: LruCache<String, CacheItem>,
    counters: Counters,
    last_cleanup: Instant,
}

impl CacheState {
    fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .rev()
            .filter(|(_, item)| item.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }
}

/// Thread-safe bounded cache with per-item TTL and LRU eviction.
///
/// Share it behind an `Arc`; all operations take `&self`.
pub struct Cache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl Cache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        let config = CacheConfig {
            max_entries: config.max_entries.max(1),
            ..config
        };
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                counters: Counters::default(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Effective configuration (capacity already clamped to at least 1).
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a value.
    ///
    /// Returns `None` when the key is absent, expired (the item is dropped)
    /// or holds a value of another type. A hit marks the key as most
    /// recently used.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = Instant::now();
        let mut state = self.state.lock();

        let lookup = state.entries.peek(key).map(|item| item.is_expired(now));
        let Some(expired) = lookup else {
            self.record_miss(&mut state, key);
            return None;
        };
        if expired {
            state.entries.pop(key);
            debug!(key, "cache entry expired");
            self.record_miss(&mut state, key);
            return None;
        }

        let value = state.entries.peek_mut(key).and_then(|item| {
            let value = (*item.data).downcast_ref::<T>().cloned()?;
            item.hit_count += 1;
            Some(value)
        });

        match value {
            Some(value) => {
                state.entries.promote(key);
                self.record_hit(&mut state, key);
                Some(value)
            }
            None => {
                debug!(key, "cached value has a different type than requested");
                self.record_miss(&mut state, key);
                None
            }
        }
    }

    /// Store a value, replacing any previous value under `key`.
    ///
    /// `ttl` defaults to [`CacheConfig::default_ttl`]. When a new key arrives
    /// at capacity, expired items are swept (subject to the cleanup
    /// interval) and then the least recently used item is evicted.
    pub fn set<T>(&self, key: impl Into<String>, value: T, ttl: Option<Duration>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let key = key.into();
        let now = Instant::now();
        let item = CacheItem {
            size_estimate: estimate_size(&value),
            data: Arc::new(value),
            created_at: now,
            ttl: ttl.unwrap_or(self.config.default_ttl),
            hit_count: 0,
        };

        let mut state = self.state.lock();
        if state.entries.pop(&key).is_none() && state.entries.len() >= self.config.max_entries {
            self.cleanup_locked(&mut state, now);
            if state.entries.len() >= self.config.max_entries
                && let Some((evicted, _)) = state.entries.pop_lru()
            {
                debug!(key = %evicted, "evicted least recently used cache entry");
                self.record_eviction(&mut state, &evicted);
            }
        }
        state.entries.put(key, item);
    }

    /// Whether a live value exists under `key`.
    ///
    /// Does not count as a read and does not refresh recency; an expired
    /// item is dropped.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let lookup = state.entries.peek(key).map(|item| item.is_expired(now));
        match lookup {
            Some(false) => true,
            Some(true) => {
                state.entries.pop(key);
                false
            }
            None => false,
        }
    }

    /// Remove `key`; returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().entries.pop(key).is_some()
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.counters = Counters::default();
    }

    /// Sweep expired entries, at most once per cleanup interval.
    ///
    /// Returns the number of entries removed (0 when throttled).
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.cleanup_locked(&mut state, now)
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current hit/miss/eviction counters and size.
    pub fn metrics(&self) -> CacheMetrics {
        let state = self.state.lock();
        CacheMetrics::new(state.counters, state.entries.len())
    }

    /// Snapshot of the contents, including size estimates and item ages.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let state = self.state.lock();
        let mut estimated_bytes = 0;
        let mut total_item_hits = 0;
        let mut oldest: Option<Instant> = None;
        for (_, item) in state.entries.iter() {
            estimated_bytes += item.size_estimate;
            total_item_hits += item.hit_count;
            oldest = Some(oldest.map_or(item.created_at, |o| o.min(item.created_at)));
        }
        CacheStats {
            size: state.entries.len(),
            max_size: self.config.max_entries,
            default_ttl_ms: self.config.default_ttl.as_millis() as u64,
            estimated_bytes,
            total_item_hits,
            oldest_entry_age_ms: oldest
                .map(|created| now.saturating_duration_since(created).as_millis() as u64),
            metrics: CacheMetrics::new(state.counters, state.entries.len()),
        }
    }

    /// Run [`cleanup()`](Self::cleanup) every `cleanup_interval` on the
    /// current tokio runtime.
    ///
    /// The task holds a weak reference and exits once the cache is dropped.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cleanup_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.cleanup();
            }
        })
    }

    fn cleanup_locked(&self, state: &mut CacheState, now: Instant) -> usize {
        if now.saturating_duration_since(state.last_cleanup) < self.config.cleanup_interval {
            return 0;
        }
        state.last_cleanup = now;
        let removed = state.sweep(now);
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
        removed
    }

    fn record_hit(&self, state: &mut CacheState, key: &str) {
        if self.config.metrics_enabled {
            state.counters.hits += 1;
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "namespace" => namespace(key).to_owned())
                .increment(1);
        }
    }

    fn record_miss(&self, state: &mut CacheState, key: &str) {
        if self.config.metrics_enabled {
            state.counters.misses += 1;
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "namespace" => namespace(key).to_owned())
                .increment(1);
        }
    }

    fn record_eviction(&self, state: &mut CacheState, key: &str) {
        if self.config.metrics_enabled {
            state.counters.evictions += 1;
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "namespace" => namespace(key).to_owned())
                .increment(1);
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Key prefix up to the first `:`, used as a metrics label.
fn namespace(key: &str) -> &str {
    key.split_once(':').map_or(key, |(ns, _)| ns)
}

/// Best-effort byte estimate: serialized JSON length at two bytes per unit.
fn estimate_size<T: Serialize>(value: &T) -> usize {
    serde_json::to_string(value)
        .map(|json| json.len() * 2)
        .unwrap_or(DEFAULT_SIZE_ESTIMATE)
}
