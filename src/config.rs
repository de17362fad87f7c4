//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (e.g. a `--config <path>` CLI flag; must exist)
//! 2. `~/.skjold/config.toml` (user)
//! 3. `/etc/skjold/config.toml` (system)
//!
//! When none exists the built-in defaults apply. Durations are written in
//! milliseconds. Breakers have no defaults: every `[breakers.<name>]` table
//! must give all three fields.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::CacheConfig;
use crate::error::{DEFAULT_RETRYABLE_PHRASES, DEFAULT_RETRYABLE_STATUSES};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::{Result, SkjoldError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub http: HttpSettings,
    /// Circuit breaker per dependency name.
    #[serde(default)]
    pub breakers: BTreeMap<String, BreakerSettings>,
}

/// Retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    /// Attempts including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on any delay (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Exponential growth factor (default: 2.0).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// ±25% delay randomization (default: true).
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
    #[serde(default = "default_retryable_phrases")]
    pub retryable_phrases: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter: true,
            retryable_statuses: default_retryable_statuses(),
            retryable_phrases: default_retryable_phrases(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_retryable_statuses() -> Vec<u16> {
    DEFAULT_RETRYABLE_STATUSES.to_vec()
}

fn default_retryable_phrases() -> Vec<String> {
    DEFAULT_RETRYABLE_PHRASES
        .iter()
        .map(|p| (*p).to_string())
        .collect()
}

/// Response cache.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Maximum entries (default: 200).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// TTL when a caller gives none (default: 300000).
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// Minimum gap between expiry sweeps (default: 60000).
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Hit/miss accounting (default: true).
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            default_ttl_ms: default_ttl_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            metrics: true,
        }
    }
}

fn default_max_entries() -> usize {
    200
}

fn default_ttl_ms() -> u64 {
    300_000
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

/// Settings for the HTTP client wrapped by the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpSettings {
    /// Per-request timeout (default: 30000).
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

/// Circuit breaker for one dependency. All fields are required.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        RetryConfig::new()
            .max_attempts(s.max_attempts)
            .base_delay(Duration::from_millis(s.base_delay_ms))
            .max_delay(Duration::from_millis(s.max_delay_ms))
            .backoff_factor(s.backoff_factor)
            .jitter(s.jitter)
            .retryable_statuses(s.retryable_statuses.iter().copied())
            .retryable_phrases(s.retryable_phrases.iter().cloned())
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(s: &CacheSettings) -> Self {
        CacheConfig::new()
            .max_entries(s.max_entries)
            .default_ttl(Duration::from_millis(s.default_ttl_ms))
            .cleanup_interval(Duration::from_millis(s.cleanup_interval_ms))
            .metrics(s.metrics)
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        CircuitBreakerConfig::new(
            s.failure_threshold,
            s.success_threshold,
            Duration::from_millis(s.timeout_ms),
        )
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.skjold/config.toml`
    /// 3. `/etc/skjold/config.toml`
    ///
    /// Falls back to defaults when no file is found.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SkjoldError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            SkjoldError::Configuration(msg) => SkjoldError::Configuration(format!("{path:?}: {msg}")),
            other => other,
        })?;
        debug!(?path, "loaded configuration");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SkjoldError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the primitives cannot work with.
    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if !retry.backoff_factor.is_finite() || retry.backoff_factor < 1.0 {
            return Err(SkjoldError::Configuration(format!(
                "retry.backoff_factor must be a finite number >= 1, got {}",
                retry.backoff_factor
            )));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(SkjoldError::Configuration(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                retry.base_delay_ms, retry.max_delay_ms
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(SkjoldError::Configuration(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }
        for (name, breaker) in &self.breakers {
            if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
                return Err(SkjoldError::Configuration(format!(
                    "breakers.{name}: thresholds must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(SkjoldError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".skjold").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/skjold/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.cache.max_entries, 200);
        assert_eq!(config.http.timeout_ms, 30_000);
        assert!(config.breakers.is_empty());
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let err = Config::from_toml_str("[retry]\nbackoff_factor = 0.5\n").unwrap_err();
        assert!(err.to_string().contains("backoff_factor"));
    }

    #[test]
    fn rejects_zero_threshold() {
        let toml = "[breakers.openai]\nfailure_threshold = 0\nsuccess_threshold = 1\ntimeout_ms = 10\n";
        assert!(Config::from_toml_str(toml).is_err());
    }
}
