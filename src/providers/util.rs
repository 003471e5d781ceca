use anyhow::Error;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Runs `operation` up to `1 + retries` times, sleeping `delay_ms` between
/// attempts, and returns the first success or the last error.
pub async fn with_retry<F, Fut, T, E>(mut operation: F, retries: usize, delay_ms: u64) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Error>,
{
    let mut attempt = 1;
    loop {
        match operation().await.map_err(Into::into) {
            Ok(val) => return Ok(val),
            Err(err) if attempt > retries => return Err(err),
            Err(err) => {
                debug!("Attempt {}/{} failed: {}. Retrying...", attempt, retries, err);
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(
            || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(anyhow!("flaky")),
                    n => Ok(n),
                }
            },
            2,
            100,
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retries() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), Error> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("down"))
            },
            1,
            100,
        )
        .await;
        assert_eq!(result.unwrap_err().to_string(), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
