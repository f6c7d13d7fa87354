use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use std::cmp::min;
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::errors::AppResult;

/// Bounded exponential backoff applied to every Graph request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.base_delay_ms as f64 * self.exponential_base.powi(exponent);

        let delay = Duration::from_millis(delay_ms as u64);
        min(delay, self.max_delay())
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

pub fn should_retry_status(status_code: u16) -> bool {
    matches!(status_code, 429 | 500 | 502 | 503 | 504)
}

/// Parse a `Retry-After` header given in seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

/// Send a request, retrying throttling, server errors and transient transport
/// failures according to `policy`.
///
/// Non-success responses that are not retried (or that exhausted the policy) are
/// returned as `Ok` so the caller can map them to its own error.
pub async fn send_with_retry<F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut send: F,
) -> AppResult<Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut attempt = 0;

    loop {
        match send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || !should_retry_status(status.as_u16()) {
                    return Ok(response);
                }

                attempt += 1;
                if attempt > policy.max_retries {
                    return Ok(response);
                }

                let delay = if status == 429 || status == 503 {
                    retry_after(response.headers())
                        .map(|d| min(d, policy.max_delay()))
                        .unwrap_or_else(|| policy.backoff_delay(attempt))
                } else {
                    policy.backoff_delay(attempt)
                };

                log::warn!(
                    "{} attempt {} returned HTTP {}, retrying in {:?}",
                    operation,
                    attempt,
                    status,
                    delay
                );
                sleep(delay).await;
            }
            Err(e) => {
                attempt += 1;
                let transient = e.is_timeout() || e.is_connect();
                if !transient || attempt > policy.max_retries {
                    return Err(e.into());
                }

                let delay = policy.backoff_delay(attempt);
                log::warn!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    operation,
                    attempt,
                    delay,
                    e
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 500,
            exponential_base: 2.0,
        };

        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(500));
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [429, 500, 502, 503, 504] {
            assert!(should_retry_status(status), "{} should retry", status);
        }
        for status in [200, 400, 401, 403, 404, 409, 416] {
            assert!(!should_retry_status(status), "{} should not retry", status);
        }
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        // HTTP-date form is not used by Graph
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_retry_after_out_of_range_values() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e300"));
        assert_eq!(retry_after(&headers), Some(Duration::MAX));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("inf"));
        assert_eq!(retry_after(&headers), Some(Duration::MAX));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("NaN"));
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("-5"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_none_policy() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.base_delay_ms, RetryPolicy::default().base_delay_ms);
    }

    #[tokio::test]
    async fn test_retry_after_overrides_backoff() {
        let server = MockServer::start_async().await;
        let throttled = server
            .mock_async(|when, then| {
                when.method(GET).path("/throttled");
                then.status(429).header("Retry-After", "0");
            })
            .await;

        // Backoff alone would wait 30s before the retry
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay_ms: 30_000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
        };
        let client = reqwest::Client::new();
        let url = server.url("/throttled");

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            send_with_retry(&policy, "throttled call", || client.get(&url).send()),
        )
        .await
        .expect("Retry-After should replace the backoff delay")
        .unwrap();

        assert_eq!(response.status(), 429);
        assert_eq!(throttled.hits_async().await, 2);
    }

    #[tokio::test]
    async fn test_retry_after_is_capped_by_max_delay() {
        let server = MockServer::start_async().await;
        let busy = server
            .mock_async(|when, then| {
                when.method(GET).path("/busy");
                then.status(503).header("Retry-After", "1e300");
            })
            .await;

        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 10,
            exponential_base: 2.0,
        };
        let client = reqwest::Client::new();
        let url = server.url("/busy");

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            send_with_retry(&policy, "busy call", || client.get(&url).send()),
        )
        .await
        .expect("Retry-After should be capped by max_delay")
        .unwrap();

        assert_eq!(response.status(), 503);
        assert_eq!(busy.hits_async().await, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_status_is_returned_immediately() {
        let server = MockServer::start_async().await;
        let missing = server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404);
            })
            .await;

        let client = reqwest::Client::new();
        let url = server.url("/missing");
        let response = send_with_retry(&RetryPolicy::default(), "missing call", || {
            client.get(&url).send()
        })
        .await
        .unwrap();

        assert_eq!(response.status(), 404);
        assert_eq!(missing.hits_async().await, 1);
    }
}
