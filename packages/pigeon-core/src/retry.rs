use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use log::warn;
use crate::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// 有上限的重试：延迟从 `base_delay` 开始每次翻倍，用尽后返回最后一次的错误。
/// 致命错误不重试。
pub async fn retry_with_falloff<F, Fut, T>(
    label: &str,
    max_attempts: u32,
    base_delay: Duration,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if e.is_fatal() || attempt >= max_attempts {
                    return Err(e);
                }

                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "Retry {}/{} for {} after {:?}. Error: {}",
                    attempt, max_attempts, label, delay, e
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let started = Instant::now();

        let result = retry_with_falloff("flaky", 3, Duration::from_secs(1), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Network("unreachable".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_on_exhaustion() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), Error> = retry_with_falloff("broken", 3, Duration::from_millis(10), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Network(format!("attempt {}", n)))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(Error::Network(msg)) if msg == "attempt 2"));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), Error> = retry_with_falloff("fatal", 5, Duration::from_secs(60), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Fatal("bad state".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
