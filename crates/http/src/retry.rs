use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::error::{ApiError, BoxError, HttpError};

/// Async callback that re-establishes credentials before an auth retry.
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

/// Exponential-backoff retry policy with an auth-refresh hook.
///
/// Retryable: transport errors, HTTP 5xx, and business errors whose
/// code is in the auth set or whose status is 401/403 (after invoking
/// the refresh callback). Decode errors and other 4xx surface directly.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    auth_codes: HashSet<String>,
    refresh: Option<RefreshFn>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            auth_codes: ["InvalidSignature", "InvalidSessionKey", "InvalidAccessToken"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            refresh: None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit backoff parameters.
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Replaces the auth-error code set.
    pub fn auth_codes<I: IntoIterator<Item = String>>(mut self, codes: I) -> Self {
        self.auth_codes = codes.into_iter().collect();
        self
    }

    /// Installs the credential-refresh callback.
    pub fn with_refresh(mut self, refresh: RefreshFn) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Backoff delay for a 0-based attempt: `min(base << attempt, max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = if self.base_delay.is_zero() {
            DEFAULT_BASE_DELAY
        } else {
            self.base_delay
        };
        let max = if self.max_delay.is_zero() {
            DEFAULT_MAX_DELAY
        } else {
            self.max_delay
        };
        base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
    }

    /// Decides whether `err` warrants another attempt.
    ///
    /// Returns the delay to sleep before retrying, `None` to stop, or
    /// the refresh callback's own error (which aborts the retry loop).
    pub(crate) async fn next_delay(
        &self,
        err: &HttpError,
        attempt: u32,
    ) -> Result<Option<Duration>, HttpError> {
        if attempt >= self.max_retries {
            return Ok(None);
        }
        let delay = self.backoff(attempt);
        match err {
            HttpError::Network(_) => {
                debug!(attempt, "network error, retrying");
                Ok(Some(delay))
            }
            HttpError::Api(api) if api.status >= 500 => {
                debug!(attempt, status = api.status, "server error, retrying");
                Ok(Some(delay))
            }
            HttpError::Api(api) if self.is_auth(api) => {
                if let Some(refresh) = &self.refresh {
                    refresh().await.map_err(HttpError::Refresh)?;
                }
                debug!(attempt, code = %api.code, "auth error, retrying after refresh");
                Ok(Some(delay))
            }
            _ => Ok(None),
        }
    }

    fn is_auth(&self, err: &ApiError) -> bool {
        if err.status == 401 || err.status == 403 {
            return true;
        }
        !err.code.is_empty() && self.auth_codes.contains(&err.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn api(code: &str, status: u16) -> HttpError {
        HttpError::Api(ApiError {
            code: code.into(),
            message: String::new(),
            status,
        })
    }

    #[test]
    fn backoff_doubles_and_clamps() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(150));
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(150)); // 200 clamped
        assert_eq!(policy.backoff(2), Duration::from_millis(150)); // 400 clamped
    }

    #[test]
    fn backoff_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(10), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn server_errors_retry() {
        let policy = RetryPolicy::default();
        let delay = policy.next_delay(&api("", 502), 0).await.unwrap();
        assert!(delay.is_some());
    }

    #[tokio::test]
    async fn decode_errors_do_not_retry() {
        let policy = RetryPolicy::default();
        let err = HttpError::Decode {
            status: 200,
            source: serde_json::from_str::<serde_json::Value>("x").unwrap_err(),
        };
        assert!(policy.next_delay(&err, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auth_code_triggers_refresh_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let policy = RetryPolicy::default().with_refresh(Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));

        let delay = policy
            .next_delay(&api("InvalidSignature", 200), 0)
            .await
            .unwrap();
        assert!(delay.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_failure_aborts() {
        let policy = RetryPolicy::default()
            .with_refresh(Arc::new(|| Box::pin(async { Err("login gone".into()) })));
        let err = policy
            .next_delay(&api("InvalidSessionKey", 401), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Refresh(_)));
    }

    #[tokio::test]
    async fn status_401_is_auth_even_without_code() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let policy = RetryPolicy::default().with_refresh(Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));
        assert!(policy.next_delay(&api("", 401), 0).await.unwrap().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_business_errors_surface() {
        let policy = RetryPolicy::default();
        assert!(policy
            .next_delay(&api("FileNotFound", 200), 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn attempts_capped() {
        let policy = RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(20));
        assert!(policy.next_delay(&api("", 500), 1).await.unwrap().is_none());
    }
}
