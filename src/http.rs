//! Call-boundary adapter for `reqwest`.
//!
//! Turns transport failures and non-success responses into tagged
//! [`SkjoldError`] variants so the retry policy can classify them by
//! pattern match. Issuing requests stays with the caller, who should give
//! the client a timeout so a hung request surfaces as
//! [`SkjoldError::Timeout`].

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use tracing::warn;

use crate::{Result, SkjoldError};

/// Longest response body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 512;

impl From<reqwest::Error> for SkjoldError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_builder() {
            SkjoldError::InvalidInput(message)
        } else if err.is_timeout() {
            SkjoldError::Timeout(message)
        } else if err.is_connect() {
            SkjoldError::Network(message)
        } else if let Some(status) = err.status() {
            from_status(status.as_u16(), message, None)
        } else if err.is_request() || err.is_body() {
            SkjoldError::Network(message)
        } else {
            SkjoldError::Http(message)
        }
    }
}

/// Map an HTTP status to the matching error variant.
///
/// 401 becomes [`AuthenticationFailed`](SkjoldError::AuthenticationFailed),
/// 429 becomes [`RateLimited`](SkjoldError::RateLimited); everything else
/// (403 included) is an [`Api`](SkjoldError::Api) error carrying the status.
pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> SkjoldError {
    match status {
        401 => SkjoldError::AuthenticationFailed,
        429 => SkjoldError::RateLimited { retry_after },
        _ => SkjoldError::Api { status, message },
    }
}

/// Pass successful responses through; convert the rest into errors.
///
/// Reads a bounded excerpt of the body into the error message and honours
/// a numeric `Retry-After` header on 429 responses.
pub async fn error_for_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);

    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string()
    } else {
        truncate(&body, MAX_ERROR_BODY)
    };

    // AuthenticationFailed carries no message
    if status == StatusCode::UNAUTHORIZED {
        warn!(body = %message, "upstream rejected credentials");
    }

    Err(from_status(status.as_u16(), message, retry_after))
}

/// Parse a `Retry-After` value given in whole seconds.
///
/// The HTTP-date form is not supported and yields `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            from_status(401, "no".into(), None),
            SkjoldError::AuthenticationFailed
        ));
        assert!(matches!(
            from_status(403, "forbidden".into(), None),
            SkjoldError::Api { status: 403, .. }
        ));
        assert!(matches!(
            from_status(429, "slow".into(), Some(Duration::from_secs(1))),
            SkjoldError::RateLimited {
                retry_after: Some(_)
            }
        ));
        assert!(matches!(
            from_status(502, "bad gateway".into(), None),
            SkjoldError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé…");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
