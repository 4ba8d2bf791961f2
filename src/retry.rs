//! Shared retry policy for transient transport failures.
//!
//! One policy object is built at startup from [`RetryConfig`] and shared by
//! every call site, instead of each service hand-rolling its own backoff
//! loop. Only errors whose [`ClientError::is_retryable`] is true are
//! re-attempted; validation and pool-exhaustion errors surface immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Exponential backoff with a cap and ±50% jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.config.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = (self.config.initial_delay_ms as f64 * exp)
            .min(self.config.max_delay_ms as f64);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_millis((base * jitter).max(1.0) as u64)
    }

    /// Run `operation`, retrying retryable failures up to the attempt cap.
    /// The final error is returned unchanged so callers keep the full
    /// taxonomy.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempt, self.config.max_attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            backoff_multiplier: 2.0,
            max_delay_ms: 10,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = policy(3)
            .run("probe", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClientError::transport("connection reset"))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempt_cap() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy(3)
            .run("probe", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::transport("still down"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_errors_never_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy(5)
            .run("probe", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Validation("bad filter".into()))
            })
            .await;
        assert!(matches!(result, Err(ClientError::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
