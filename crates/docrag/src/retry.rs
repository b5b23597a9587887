//! Bounded exponential backoff shared by every outbound call.
//!
//! Only [`RagError::StoreUnavailable`] is retried: network failures,
//! timeouts, HTTP 429/5xx and SQLite pool/IO errors are mapped to it by
//! the gateways. Everything else fails immediately.

use std::future::Future;
use std::time::Duration;

use docrag_core::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// 1s, 2s, 4s, ... capped at 32s.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retriable error, or
    /// the retry budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Whether an HTTP status is worth retrying.
pub fn is_retriable_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Map a reqwest transport error onto the taxonomy.
pub fn classify_reqwest(service: &str, err: reqwest::Error) -> RagError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RagError::unavailable(service, err.to_string())
    } else {
        RagError::backend(service, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries)
            .with_delays(Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new(5);
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(10), Duration::from_secs(32));
    }

    #[test]
    fn retriable_statuses() {
        assert!(is_retriable_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retriable_status(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_retriable_status(reqwest::StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let out = fast(3)
            .run("probe", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RagError::unavailable("db", "busy"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let err = fast(2)
            .run("probe", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RagError::unavailable("db", "down"))
            })
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let _ = fast(5)
            .run("probe", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RagError::backend("db", "syntax error"))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
