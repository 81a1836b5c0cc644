//! Retry-with-backoff wrapper for the one failure mode a session mutation is
//! allowed to retry: a transient storage error (§4.6). Three attempts at
//! 100ms/400ms/1000ms; any other error, or the final attempt, aborts the
//! whole operation so no partial state is ever left behind.

use std::time::Duration;

use cs_core::{ClientCode, CsError, Result};

const DELAYS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(400),
    Duration::from_millis(1000),
];

pub(crate) async fn retry_transient<T, F, Fut>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err = None;
    for (idx, delay) in DELAYS.into_iter().enumerate() {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.client_code() == ClientCode::TransientStorage => {
                tracing::warn!(%err, "transient storage error, retrying");
                last_err = Some(err);
                if idx + 1 < DELAYS.len() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| CsError::TransientStorage("retry attempts exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let result = retry_transient(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CsError::TransientStorage("db hiccup".to_string()))
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
    async fn non_transient_errors_abort_immediately() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = retry_transient(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(CsError::Conflict("already closed".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
