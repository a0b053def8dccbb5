use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::error::UpstreamError;

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// schedule runs out. One delay per retry, so at most `schedule.len() + 1` attempts.
pub async fn with_backoff<T, F, Fut>(schedule: &[Duration], mut op: F) -> Result<T, UpstreamError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => match schedule.get(attempt) {
                Some(delay) => {
                    warn!(
                        "Attempt {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(*delay).await;
                    attempt += 1;
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}
