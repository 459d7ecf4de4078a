use std::future::Future;

use tokio::time::{sleep, Duration};
use tracing::warn;

/// Runs an async operation up to `max_attempts` times with exponential
/// backoff between attempts (`base_delay`, doubled after each failure).
///
/// The final error is returned when all attempts fail.
pub async fn with_retries<T, E, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(%err, label, attempt, "giving up after repeated failures");
                    return Err(err);
                }
                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(%err, label, attempt, delay_ms = delay.as_millis() as u64, "retrying");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> =
            with_retries(3, Duration::from_millis(100), "op", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> =
            with_retries(3, Duration::from_millis(100), "op", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            })
            .await;

        assert_eq!(result, Err("nope".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
