//! ISBNdb bulk-lookup client with transient-error retry.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::limiter::RateLimiter;

/// Total attempts per fetch, counting the first one.
const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Classified upstream failures. Callers match exhaustively: rate-limit and
/// quota errors bypass the retry layer entirely so the orchestrator can apply
/// batch-level backoff.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limit exceeded (HTTP 429)")]
    RateLimited,
    #[error("daily quota exhausted (HTTP 403)")]
    QuotaExceeded,
    #[error("transient upstream failure: {0}")]
    Transient(String),
    #[error("unexpected upstream response {status}: {body}")]
    Terminal { status: u16, body: String },
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

/// The upstream surface the orchestrator depends on; faked in tests.
#[async_trait]
pub trait BookApi: Send + Sync {
    /// Fetch enriched records for a batch of ISBNs. The raw JSON payload is
    /// returned untouched so it can be archived before normalization.
    async fn fetch_batch(&self, isbns: &[String]) -> Result<Value, ApiError>;
}

#[derive(Clone)]
pub struct IsbndbClient {
    http: Client,
    base_url: Url,
    api_key: String,
    limiter: Arc<RateLimiter>,
}

impl fmt::Debug for IsbndbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsbndbClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl IsbndbClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        let http = Client::builder()
            .user_agent("isbndump/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
            limiter,
        })
    }

    async fn attempt(&self, isbns: &[String]) -> Result<Value, ApiError> {
        // Admission gate: the sustained-rate ceiling applies to every call
        // start, retries included.
        self.limiter.acquire().await;

        let endpoint = self
            .base_url
            .join("books")
            .map_err(|e| ApiError::Terminal {
                status: 0,
                body: format!("invalid base URL: {e}"),
            })?;
        let res = self
            .http
            .post(endpoint)
            .header("Authorization", &self.api_key)
            .json(&json!({ "isbns": isbns }))
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        let status = res.status();
        if status.is_success() {
            return res
                .json::<Value>()
                .await
                .map_err(|e| ApiError::Transient(format!("invalid response body: {e}")));
        }

        let body = res.text().await.unwrap_or_default();
        Err(classify_failure(status, body))
    }
}

/// Map a non-2xx upstream status to the error taxonomy.
fn classify_failure(status: StatusCode, body: String) -> ApiError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ApiError::RateLimited;
    }
    if status == StatusCode::FORBIDDEN && is_quota_message(&body) {
        return ApiError::QuotaExceeded;
    }
    if status.is_server_error() {
        return ApiError::Transient(format!("upstream {status}: {body}"));
    }
    ApiError::Terminal {
        status: status.as_u16(),
        body,
    }
}

/// ISBNdb signals quota exhaustion as a 403 with an explanatory body; any
/// other 403 (bad key, forbidden endpoint) is terminal.
fn is_quota_message(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("quota") || lower.contains("daily limit")
}

/// Retry `op` on transient failures: `max_attempts` total, exponential
/// backoff starting at `base` and doubling up to `cap`. The last transient
/// error is surfaced unmodified; rate-limit, quota and terminal errors
/// propagate immediately.
pub async fn retry_transient<T, F, Fut>(
    max_attempts: u32,
    base: Duration,
    cap: Duration,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut delay = base;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(attempt, max_attempts, %err, "transient upstream failure; retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(cap);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[async_trait]
impl BookApi for IsbndbClient {
    async fn fetch_batch(&self, isbns: &[String]) -> Result<Value, ApiError> {
        debug!(count = isbns.len(), "fetching batch from ISBNdb");
        retry_transient(MAX_ATTEMPTS, BACKOFF_BASE, BACKOFF_CAP, || {
            self.attempt(isbns)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn classify_429_is_rate_limited() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(err, ApiError::RateLimited));
    }

    #[test]
    fn classify_403_with_quota_body() {
        let err = classify_failure(
            StatusCode::FORBIDDEN,
            r#"{"message":"You have exceeded your daily quota"}"#.into(),
        );
        assert!(matches!(err, ApiError::QuotaExceeded));
    }

    #[test]
    fn classify_403_without_quota_body_is_terminal() {
        let err = classify_failure(StatusCode::FORBIDDEN, "invalid api key".into());
        assert!(matches!(err, ApiError::Terminal { status: 403, .. }));
    }

    #[test]
    fn classify_5xx_is_transient() {
        let err = classify_failure(StatusCode::BAD_GATEWAY, "".into());
        assert!(err.is_transient());
    }

    #[test]
    fn classify_404_is_terminal() {
        let err = classify_failure(StatusCode::NOT_FOUND, "".into());
        assert!(matches!(err, ApiError::Terminal { status: 404, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_bound_is_exactly_five_attempts() {
        let calls = AtomicU32::new(0);
        let res: Result<(), ApiError> =
            retry_transient(5, Duration::from_secs(1), Duration::from_secs(30), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::Transient("connection reset".into())) }
            })
            .await;

        assert!(matches!(res, Err(ApiError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let res = retry_transient(5, Duration::from_secs(1), Duration::from_secs(30), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ApiError::Transient("timeout".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(res.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_bypasses_retry() {
        let calls = AtomicU32::new(0);
        let res: Result<(), ApiError> =
            retry_transient(5, Duration::from_secs(1), Duration::from_secs(30), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::RateLimited) }
            })
            .await;

        assert!(matches!(res, Err(ApiError::RateLimited)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn terminal_bypasses_retry() {
        let calls = AtomicU32::new(0);
        let res: Result<(), ApiError> =
            retry_transient(5, Duration::from_secs(1), Duration::from_secs(30), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ApiError::Terminal {
                        status: 400,
                        body: "bad request".into(),
                    })
                }
            })
            .await;

        assert!(matches!(res, Err(ApiError::Terminal { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
