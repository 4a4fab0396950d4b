//! Backend error taxonomy and retry policy for the reasoning client.

use std::time::Duration;
use thiserror::Error;

/// Coarse failure categories; retry behavior keys off these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// 429 or provider-side throttling. Wait and try again without
    /// consuming a retry.
    RateLimited,
    /// 401/403. Never retried; the whole reasoning source is disabled.
    Auth,
    /// 5xx. Transient, retried with backoff.
    ServerError,
    /// Other 4xx. Our request is wrong; retrying the same one is pointless
    /// but a reshaped attempt may still succeed.
    ClientError,
    /// Connection or timeout failure.
    Network,
    /// Response arrived but was not usable.
    Parse,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendErrorKind::RateLimited => "rate_limited",
            BackendErrorKind::Auth => "auth",
            BackendErrorKind::ServerError => "server_error",
            BackendErrorKind::ClientError => "client_error",
            BackendErrorKind::Network => "network",
            BackendErrorKind::Parse => "parse",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    /// Provider-suggested wait, from a Retry-After header when present.
    pub retry_after: Option<Duration>,
    pub status: Option<u16>,
}

impl BackendError {
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: BackendErrorKind::RateLimited,
            message: message.into(),
            retry_after,
            status: Some(429),
        }
    }

    pub fn auth(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Auth,
            message: message.into(),
            retry_after: None,
            status: Some(status),
        }
    }

    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::ServerError,
            message: message.into(),
            retry_after: None,
            status: Some(status),
        }
    }

    pub fn client_error(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::ClientError,
            message: message.into(),
            retry_after: None,
            status: Some(status),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Network,
            message: message.into(),
            retry_after: None,
            status: None,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Parse,
            message: message.into(),
            retry_after: None,
            status: None,
        }
    }

    /// How long to wait before the next attempt. Rate limits use the
    /// provider's suggestion when given; everything else backs off
    /// exponentially from two seconds.
    pub fn suggested_delay(&self, attempt: u32, default_rate_limit_backoff: Duration) -> Duration {
        match self.kind {
            BackendErrorKind::RateLimited => {
                self.retry_after.unwrap_or(default_rate_limit_backoff)
            }
            _ => Duration::from_secs(2u64.saturating_pow(attempt.min(5)).max(2)),
        }
    }
}

pub fn classify_http_status(status: u16) -> BackendErrorKind {
    match status {
        429 => BackendErrorKind::RateLimited,
        401 | 403 => BackendErrorKind::Auth,
        500..=599 => BackendErrorKind::ServerError,
        400..=499 => BackendErrorKind::ClientError,
        _ => BackendErrorKind::ServerError,
    }
}

/// Bounded-retry policy for the estimator loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts consumed by parse, shape, and transient failures. Rate-limit
    /// waits do not consume an attempt.
    pub max_retries: u32,
    /// Wait applied to a rate-limit error with no provider suggestion.
    pub rate_limit_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            rate_limit_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, error: &BackendError) -> bool {
        match error.kind {
            BackendErrorKind::Auth => false,
            BackendErrorKind::RateLimited => true,
            BackendErrorKind::ServerError
            | BackendErrorKind::ClientError
            | BackendErrorKind::Network
            | BackendErrorKind::Parse => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_http_status(429), BackendErrorKind::RateLimited);
        assert_eq!(classify_http_status(401), BackendErrorKind::Auth);
        assert_eq!(classify_http_status(403), BackendErrorKind::Auth);
        assert_eq!(classify_http_status(503), BackendErrorKind::ServerError);
        assert_eq!(classify_http_status(400), BackendErrorKind::ClientError);
    }

    #[test]
    fn test_rate_limit_delay_prefers_provider_suggestion() {
        let e = BackendError::rate_limited("slow down", Some(Duration::from_secs(42)));
        assert_eq!(
            e.suggested_delay(0, Duration::from_secs(30)),
            Duration::from_secs(42)
        );

        let e = BackendError::rate_limited("slow down", None);
        assert_eq!(
            e.suggested_delay(0, Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_auth_is_never_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&BackendError::auth(401, "bad key")));
        assert!(policy.should_retry(&BackendError::parse("truncated")));
    }
}
