//! Polling with a deadline

use std::future::Future;
use std::time::Duration;

use tracing::trace;

use crate::{Error, Result};

/// Poll until a condition is met or timeout is reached
///
/// Repeatedly calls `check_fn` until it returns `Ok(true)` or the timeout is
/// exceeded. Errors from `check_fn` abort the wait immediately: the client
/// underneath has already retried transient faults.
///
/// # Arguments
/// * `timeout` - Maximum time to wait for the condition
/// * `poll_interval` - Time between polling attempts
/// * `timeout_msg` - Error message to use on timeout
/// * `check_fn` - Async function returning `Ok(true)` when the condition is met
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = tokio::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        if check_fn().await? {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(Error::fatal_with_context("poll_until", timeout_msg));
        }
        trace!("Polling condition not yet met, retrying...");
        tokio::time::sleep(poll_interval).await;
    }
}
