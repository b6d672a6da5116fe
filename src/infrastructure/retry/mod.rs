use crate::foundation::{NodeError, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MIN_BACKOFF_CAP: Duration = Duration::from_millis(100);
const BACKOFF_DEADLINE_FRACTION: u32 = 10;

/// Re-invokes `op` on error until it succeeds or the deadline elapses.
///
/// Backoff doubles from one second and is capped at a tenth of the deadline,
/// so short deadlines still get several attempts. Each attempt runs under
/// the remaining budget; cancellation of the caller propagates because
/// dropping the returned future aborts the in-flight attempt.
pub async fn run_with_retry<T, F, Fut>(deadline: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let backoff_cap = (deadline / BACKOFF_DEADLINE_FRACTION).max(MIN_BACKOFF_CAP);
    let mut backoff = INITIAL_BACKOFF.min(backoff_cap);

    loop {
        let remaining = match deadline.checked_sub(started.elapsed()) {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => return Err(deadline_error(deadline)),
        };

        match timeout(remaining, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                let remaining = deadline.saturating_sub(started.elapsed());
                if backoff >= remaining {
                    return Err(err);
                }
                sleep(backoff).await;
                backoff = (backoff * 2).min(backoff_cap);
            }
            Err(_) => return Err(deadline_error(deadline)),
        }
    }
}

fn deadline_error(deadline: Duration) -> NodeError {
    NodeError::Timeout { operation: "retried operation".to_string(), seconds: deadline.as_secs() }
}
