use rand::random;
use std::future::Future;
use std::time::Duration;

use super::EmbeddingError;

/// Retry policy for provider calls.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)` plus up to
/// `max_jitter` of random jitter before running.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// Retries immediately, used by tests.
    #[cfg(test)]
    pub fn no_delay(max_retries: usize) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let exp = self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1) as u32);
        exp + jitter(self.max_jitter)
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(random::<u64>() % max_ms)
}

/// Run `op` until it succeeds, fails with a non-retryable error or the
/// retries run out. `op` receives the 0-based attempt number.
pub(super) async fn with_retry<F, Fut, T>(config: &RetryConfig, mut op: F) -> Result<T, EmbeddingError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, EmbeddingError>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Err(err) if attempt < config.max_retries && err.is_retryable() => {
                attempt += 1;
                let delay = config.backoff(attempt);
                log::info!(
                    "embedding request failed: {err}; retrying (attempt {}/{}) in {}ms",
                    attempt,
                    config.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}
