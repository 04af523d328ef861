/// Retry policy with exponential backoff and a retryability predicate
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub min_backoff: Duration,
    /// Ceiling for any single backoff
    pub max_backoff: Duration,
    /// Multiplier applied per attempt
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Backoff to wait after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let millis = (self.min_backoff.as_millis() as f64 * exp)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("retry budget exhausted after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },
    #[error("permanent failure: {0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// Unwrap the underlying error regardless of how the retry loop ended.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Permanent(e) => e,
        }
    }
}

/// Execute a fallible future with bounded retries.
///
/// `retryable` decides whether an error is worth another attempt; errors it
/// rejects are returned immediately as `RetryError::Permanent` without
/// consuming the remaining budget.
pub async fn with_retry<F, Fut, T, E, P>(
    config: &RetryConfig,
    retryable: P,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1u32;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !retryable(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(attempts = attempt, error = %e, "retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: e,
                    });
                }

                let delay = apply_jitter(config.backoff_for(attempt), config.jitter);
                warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn apply_jitter(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let mut rng = rand::thread_rng();
        let factor = 1.0 + rng.gen_range(-0.3..0.3);
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(), |_: &String| true, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(), |_: &&str| true, move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("temporary error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_exhausted_surfaces_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(), |_: &&str| true, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>("persistent error") }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_short_circuits() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(), |_: &&str| false, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>("bad request") }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exponential_backoff_schedule() {
        let config = fast_config();
        assert_eq!(config.backoff_for(1), Duration::from_millis(10));
        assert_eq!(config.backoff_for(2), Duration::from_millis(20));
        assert_eq!(config.backoff_for(3), Duration::from_millis(40));
        // Clamped by max_backoff
        assert_eq!(config.backoff_for(4), Duration::from_millis(50));

        let start = std::time::Instant::now();
        let _ = with_retry(&config, |_: &&str| true, || async { Err::<i32, _>("err") }).await;
        // Two backoffs: 10ms + 20ms
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
