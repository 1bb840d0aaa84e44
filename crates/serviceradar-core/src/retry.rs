//! Exponential backoff for `SinkTransient`/`RegistryUnavailable` recovery
//! (spec §7). Bounded by the per-probe timeout so a stuck sink can never
//! stall a sweep cycle past its soft budget.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff schedule for retrying a transient sink failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryConfig {
    /// Bounds the backoff schedule by the per-probe timeout, per spec §7.
    pub fn bounded_by_timeout(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(50),
            max_delay: timeout,
            multiplier: 2.0,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

/// Runs `op` up to `config.max_attempts` times, sleeping with exponential
/// backoff between attempts. Returns the last error on exhaustion.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                debug!(%label, attempt, %err, ?delay, "retrying after transient failure");
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(%label, attempts = attempt + 1, %err, "giving up after final retry");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let config = RetryConfig::bounded_by_timeout(Duration::from_millis(100), 3);
        let result: Result<u32, &str> = retry_with_backoff(&config, "test", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let config = RetryConfig::bounded_by_timeout(Duration::from_millis(50), 5);
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(&config, "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let config = RetryConfig::bounded_by_timeout(Duration::from_millis(10), 2);
        let result: Result<u32, &str> =
            retry_with_backoff(&config, "test", || async { Err("still failing") }).await;
        assert_eq!(result.unwrap_err(), "still failing");
    }
}
