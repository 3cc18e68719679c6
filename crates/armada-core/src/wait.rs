//! Bounded polling and exponential backoff retry
//!
//! Cloud APIs are eventually consistent and SSH channels fail transiently;
//! every other crate funnels its waiting through these two helpers so that
//! attempt budgets and sleep behaviour stay uniform.

use crate::error::{CancelledError, WaitError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Poll `op` until it yields `Some`, up to `attempts` times.
///
/// Sleeps `interval` between attempts, never after the final one.
/// Exhausting the budget returns [`WaitError`] carrying `what` so the
/// operator can see what was being awaited.
pub async fn poll<T, E, F, Fut>(
    attempts: u32,
    interval: Duration,
    what: &str,
    mut op: F,
) -> Result<Result<T, E>, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 0..attempts {
        match op().await {
            Ok(Some(value)) => return Ok(Ok(value)),
            Ok(None) => {}
            Err(e) => return Ok(Err(e)),
        }

        if attempt + 1 < attempts {
            sleep(interval).await;
        }
    }

    Err(WaitError {
        what: what.to_string(),
        attempts,
    })
}

/// Re-invoke `op` while `is_retryable` accepts the error.
///
/// Sleeps `base^attempt` seconds between tries (attempt starting at 1) and
/// returns the *original* error once `retries` is exhausted. Only transient
/// failures belong here; callers decide what is transient via
/// `is_retryable`, never by matching error text.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    retries: u32,
    base: f64,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt > retries || !is_retryable(&e) {
                    return Err(e);
                }
                let backoff = base.powi(attempt as i32);
                tracing::debug!(attempt, backoff_secs = backoff, "retrying after failure");
                sleep(Duration::from_secs_f64(backoff)).await;
            }
        }
    }
}

/// Drive `op` to completion unless `cancel` fires first.
///
/// Cancellation drops the in-flight future at its current await point, so
/// a stuck poll or hanging remote command stops immediately. The check is
/// biased toward the token: an already-cancelled token aborts before `op`
/// is polled at all.
pub async fn with_cancellation<F>(
    cancel: &CancellationToken,
    what: &str,
    op: F,
) -> Result<F::Output, CancelledError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CancelledError {
            what: what.to_string(),
        }),
        output = op => Ok(output),
    }
}
