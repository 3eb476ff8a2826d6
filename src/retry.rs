use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Bounded exponential backoff, used for establishing connections only.
/// A request that reached the wire is never replayed.
pub struct RetryStrategy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryStrategy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if attempt >= self.max_retries => return Err(err),
                Err(err) => {
                    let delay = self.calculate_delay(attempt);
                    warn!(attempt = attempt + 1, ?delay, error = %err, "attempt failed, backing off");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles() {
        let strategy = RetryStrategy::new(5, Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_saturates() {
        let strategy = RetryStrategy::new(100, Duration::from_secs(1));
        assert_eq!(
            strategy.calculate_delay(64),
            Duration::from_secs(u64::from(u32::MAX))
        );
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let strategy = RetryStrategy::new(2, Duration::from_millis(1));

        let result: Result<(), String> = strategy
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("refused".to_string())
            })
            .await;

        assert_eq!(result, Err("refused".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_runs_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let strategy = RetryStrategy::new(0, Duration::from_millis(10));

        let result: Result<u32, String> = strategy
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
