//! Deadline-bounded retry primitive.
//!
//! [`try_until`] is the single retry mechanism in the coordinator: it
//! knows nothing about what a probe does, only that it either succeeds
//! or fails. It is reused for "wait for the agent HTTP endpoint",
//! "wait for join" and "wait for raft sync".

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::errors::CoordError;

/// Fixed delay between retry attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// A wall-clock deadline.
///
/// Captured once at construction and polled via [`Timeout::expired`];
/// never reset and never cancellable. Once expired it stays expired.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    deadline: Instant,
}

impl Timeout {
    /// Create a deadline `duration` from now.
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
        }
    }

    /// Has the deadline passed?
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Repeatedly await `probe` until it succeeds or `timeout` expires.
///
/// On success the probe's value is returned immediately. On failure the
/// loop sleeps `delay`, then checks the deadline before trying again; if
/// the deadline has passed when a retry would begin, the last probe error
/// is wrapped in [`CoordError::TimeoutExceeded`] so the caller can see
/// why convergence failed.
pub async fn try_until<T, F, Fut>(
    timeout: &Timeout,
    delay: Duration,
    mut probe: F,
) -> Result<T, CoordError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoordError>>,
{
    loop {
        match probe().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tokio::time::sleep(delay).await;
                if timeout.expired() {
                    return Err(CoordError::TimeoutExceeded {
                        last: err.to_string(),
                    });
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
