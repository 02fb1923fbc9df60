use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

use super::error::{BrowserError, BrowserResult};

// Retryable faults count as "not yet"; any other fault aborts the wait.
pub async fn wait_until<F, Fut, T>(
    condition: &str,
    timeout: Duration,
    poll: Duration,
    mut probe: F,
) -> BrowserResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrowserResult<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        match probe().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(err) if err.is_retryable() => {
                trace!(condition, error = %err, "transient fault while waiting");
            }
            Err(err) => return Err(err),
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(BrowserError::Timeout(condition.to_string()));
        }
        sleep(poll.min(deadline - now)).await;
    }
}

pub async fn wait_until_not<F, Fut>(
    condition: &str,
    timeout: Duration,
    poll: Duration,
    mut probe: F,
) -> BrowserResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrowserResult<bool>>,
{
    wait_until(condition, timeout, poll, move || {
        let pending = probe();
        async move {
            let present = pending.await?;
            Ok::<_, BrowserError>(if present { None } else { Some(()) })
        }
    })
    .await
}
