//! Poll-with-deadline helper.

use std::future::Future;
use std::time::Duration;

/// Poll `check` every `interval` until it yields a value or `timeout` elapses.
///
/// The first check runs immediately and the last one runs at the deadline.
/// Returns `Ok(None)` on timeout. Errors from `check` abort the wait.
pub async fn wait_for<T, E, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(value) = check().await? {
            return Ok(Some(value));
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
