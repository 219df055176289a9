//! Bounded polling, the only synchronization primitive used against the portal.

use std::time::{Duration, Instant};

/// Why a poll gave up.
#[derive(Debug, PartialEq)]
pub enum PollError<E> {
    /// The predicate never held within the timeout.
    Timeout(Duration),
    /// The predicate itself failed in a way that retrying will not fix.
    Failed(E),
}

/// Evaluate `predicate` every `interval` until it returns `Ok(true)` or
/// `timeout` elapses. The predicate is always evaluated at least once.
pub fn poll_until<F, E>(mut predicate: F, timeout: Duration, interval: Duration) -> Result<(), PollError<E>>
where
    F: FnMut() -> Result<bool, E>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate().map_err(PollError::Failed)? {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::Timeout(timeout));
        }
        std::thread::sleep(interval.min(deadline - now));
    }
}
