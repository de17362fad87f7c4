//! Skjold error types

use std::time::Duration;

/// Status codes treated as transient unless a [`RetryConfig`](crate::RetryConfig)
/// overrides the set.
pub const DEFAULT_RETRYABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Message fragments (matched case-insensitively) that mark an untyped
/// transport error as transient.
pub const DEFAULT_RETRYABLE_PHRASES: &[&str] = &[
    "econnreset",
    "econnrefused",
    "etimedout",
    "enotfound",
    "connection reset",
    "connection refused",
    "dns",
    "network error",
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "quota exceeded",
    "service unavailable",
];

/// Skjold error types
#[derive(Debug, thiserror::Error)]
pub enum SkjoldError {
    // Transport errors
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    /// Untyped transport failure; classified by message content.
    #[error("HTTP error: {0}")]
    Http(String),

    // Upstream responses
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Synthetic rejection from a circuit breaker
    #[error("circuit open for '{dependency}', next attempt in {retry_in:?}")]
    CircuitOpen {
        dependency: String,
        retry_in: Duration,
    },

    // Configuration errors
    #[error("no circuit breaker registered for dependency '{0}'")]
    UnknownDependency(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SkjoldError {
    /// Whether the error is worth retrying under the default policy.
    ///
    /// Callers with a custom policy should use
    /// [`RetryConfig::is_retryable()`](crate::RetryConfig::is_retryable).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => DEFAULT_RETRYABLE_STATUSES.contains(status),
            Self::Http(message) => contains_phrase(message, DEFAULT_RETRYABLE_PHRASES),
            _ => false,
        }
    }

    /// Server-supplied wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::AuthenticationFailed => Some(401),
            _ => None,
        }
    }

    /// Whether this is a breaker rejection rather than a real upstream failure.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Text suitable for showing to an end user.
    ///
    /// A circuit-open rejection hides the (possibly stale) failure that
    /// tripped the breaker.
    pub fn user_message(&self) -> String {
        match self {
            Self::CircuitOpen { .. } => "this provider is temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

/// Case-insensitive substring match against a phrase list.
pub(crate) fn contains_phrase<S: AsRef<str>>(message: &str, phrases: &[S]) -> bool {
    let message = message.to_lowercase();
    phrases
        .iter()
        .any(|p| message.contains(&p.as_ref().to_lowercase()))
}

/// Result type alias for Skjold operations
pub type Result<T> = std::result::Result<T, SkjoldError>;
