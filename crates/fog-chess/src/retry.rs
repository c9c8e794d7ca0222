//! Bounded retry for writes to external ports.

use std::fmt::Display;
use std::future::Future;

use tracing::{error, warn};

use crate::config::RetryConfig;

/// Run `op` until it succeeds or `config.max_retries` retries have failed.
///
/// Each failure is logged at `warn`; exhaustion is logged at `error` and the
/// last error is returned. Sleeps between attempts follow
/// [`RetryConfig::backoff`].
pub async fn with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries => {
                attempt += 1;
                let backoff = config.backoff(attempt);
                warn!(
                    what,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "write failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                error!(what, attempts = attempt + 1, error = %e, "write failed, giving up");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, String> = with_backoff(&fast(), "test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(format!("failure {n}"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = with_backoff(&fast(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;
        assert_eq!(result, Err("down".to_string()));
        // First attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
