//! HTTP retry helpers for transient errors.
//!
//! Source fetchers go through [`send_json`] rather than calling
//! `reqwest::RequestBuilder::send()` directly, so every request gets
//! exponential backoff on timeouts, connection resets, HTTP 429 and 5xx.
//!
//! ```ignore
//! let rows: Vec<RawIncident> =
//!     retry::send_json(&policy, || client.get(&url).query(&params)).await?;
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::SourceError;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// How hard to retry a request before giving up.
///
/// Delays double from `base_delay`: with the defaults (3 retries, 1s) the
/// waits are 1s, 2s, 4s, which keeps a failing refresh well inside a
/// one-minute tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// What to do with a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Use the response.
    Accept,
    /// Try again after a backoff.
    Retry,
    /// Give up immediately.
    Fail,
}

/// Classifies a response status. 429 and 5xx are retried; any other 4xx
/// is permanent.
#[must_use]
pub fn classify_status(status: reqwest::StatusCode) -> Disposition {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Disposition::Retry
    } else if status.is_client_error() {
        Disposition::Fail
    } else {
        Disposition::Accept
    }
}

/// Sends an HTTP request and decodes the JSON body into `T`.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by `.send()`).
///
/// A body that arrives but cannot be read is re-fetched under the same
/// policy. A body that reads but does not decode as `T` is returned as an
/// error right away: the server answered, just not with rows.
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails after all retries, the
/// server returns a non-retryable status, or the body does not decode.
#[allow(clippy::future_not_send)]
pub async fn send_json<T, F>(policy: &RetryPolicy, build_request: F) -> Result<T, SourceError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut body_attempt = 0;
    loop {
        let response = send_inner(policy, &build_request).await?;
        let url = response.url().to_string();
        let status = response.status();

        match response.text().await {
            Ok(text) => {
                return serde_json::from_str(&text).map_err(|e| {
                    let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
                    log::error!(
                        "JSON decode failed.\n  \
                         url: {url}\n  \
                         status: {status}\n  \
                         received: {} bytes\n  \
                         error: {e}\n  \
                         body preview: {preview}",
                        text.len(),
                    );
                    SourceError::Json(e)
                });
            }
            Err(e) if body_attempt < policy.max_retries => {
                body_attempt += 1;
                let delay = policy.delay_for(body_attempt);
                log::warn!(
                    "Response body read failed (body retry {body_attempt}/{}), \
                     re-fetching in {delay:?}: {e}",
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::error!("Response body read failed from {url}, giving up: {e}");
                return Err(SourceError::Decode {
                    message: format!("body read failed after {body_attempt} retries: {e}"),
                });
            }
        }
    }
}

/// Core retry loop: sends the request, retrying transient failures with
/// exponential backoff. Returns a response whose status was accepted.
#[allow(clippy::future_not_send)]
async fn send_inner<F>(
    policy: &RetryPolicy,
    build_request: &F,
) -> Result<reqwest::Response, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            log::warn!("  retry {attempt}/{} in {delay:?}...", policy.max_retries);
            tokio::time::sleep(delay).await;
        }
        let can_retry = attempt < policy.max_retries;
        attempt += 1;

        match build_request().send().await {
            Err(e) if is_transient(&e) && can_retry => {
                log::warn!("  transient error: {e}");
            }
            Err(e) => return Err(SourceError::Http(e)),
            Ok(response) => {
                let status = response.status();
                match classify_status(status) {
                    Disposition::Accept => return Ok(response),
                    Disposition::Retry if can_retry => {
                        log::warn!("  HTTP {status} from {}", response.url());
                    }
                    Disposition::Retry | Disposition::Fail => {
                        return Err(SourceError::Status {
                            status: status.as_u16(),
                            url: response.url().to_string(),
                        });
                    }
                }
            }
        }
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn retries_rate_limits_and_server_errors() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), Disposition::Retry);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), Disposition::Retry);
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Disposition::Retry
        );
    }

    #[test]
    fn fails_fast_on_client_errors() {
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), Disposition::Fail);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), Disposition::Fail);
    }

    #[test]
    fn accepts_success() {
        assert_eq!(classify_status(StatusCode::OK), Disposition::Accept);
    }

    #[test]
    fn backoff_doubles_from_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }
}
