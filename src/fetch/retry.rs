//! Backoff policy for zone file downloads.
//!
//! Only connection-level failures are retried; an HTTP error status means the
//! server answered and asking again will not change that.

use std::time::Duration;

use super::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Exponential backoff with a cap.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// `retry` is 1-based: the number of the retry about to be made.
    pub fn decide(&self, retry: u32, err: &FetchError) -> RetryDecision {
        if retry > self.max_retries || !err.is_connection() {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff(retry))
    }

    /// base * 2^(retry-1), capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use url::Url;

    #[test]
    fn backoff_doubles_from_base() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(p.backoff(9), Duration::from_secs(3));
    }

    #[test]
    fn status_errors_are_not_retried() {
        let err = FetchError::Status {
            url: Url::parse("https://example.com/005.xls").unwrap(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        assert_eq!(RetryPolicy::default().decide(1, &err), RetryDecision::NoRetry);
    }

    #[tokio::test]
    async fn refused_connections_are_retried_until_the_limit() {
        // bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = Url::parse(&format!("http://127.0.0.1:{}/005.xls", port)).unwrap();
        let source = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .get(url.clone())
            .send()
            .await
            .unwrap_err();
        let err = FetchError::Network { url, source };
        assert!(err.is_connection(), "{err:?}");

        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, &err), RetryDecision::RetryAfter(Duration::from_millis(500)));
        assert_eq!(p.decide(3, &err), RetryDecision::RetryAfter(Duration::from_millis(2000)));
        assert_eq!(p.decide(4, &err), RetryDecision::NoRetry);
    }
}
