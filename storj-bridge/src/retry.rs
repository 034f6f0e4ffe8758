//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run `op` up to `retries + 1` times, sleeping `base_delay * 2^n` between
/// attempts. Only errors `is_transient` approves are retried; the final
/// error is returned unchanged.
pub async fn with_backoff<T, E, F, Fut, P>(
    retries: usize,
    base_delay: Duration,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut delay = base_delay;
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retries && is_transient(&err) => {
                attempt += 1;
                debug!(attempt, %err, "retrying after transient error");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(err) => return Err(err),
        }
    }
}
