//! Await primitive - cooperative poll until settled or timed out
//!
//! Task and debug waits share this routine. A probe reports whether the
//! observed record has settled; between probes the caller's task sleeps for
//! the configured interval so the callbacks that settle the record can run.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default await timeout
pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll cadence and default budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub default_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            default_timeout: DEFAULT_AWAIT_TIMEOUT,
        }
    }
}

impl PollSettings {
    pub fn new(interval: Duration, default_timeout: Duration) -> Self {
        Self {
            interval,
            default_timeout,
        }
    }
}

/// Result of a single probe
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// Condition holds
    Settled(T),
    /// Still in progress; carries the latest observation
    Pending(T),
}

/// Result of a whole wait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WaitOutcome<T> {
    Settled(T),
    /// Budget exhausted; the observed operation keeps running
    TimedOut(T),
}

impl<T> WaitOutcome<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut(_))
    }

    pub fn value(&self) -> &T {
        match self {
            WaitOutcome::Settled(v) | WaitOutcome::TimedOut(v) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            WaitOutcome::Settled(v) | WaitOutcome::TimedOut(v) => v,
        }
    }
}

/// Poll `probe` until it reports [`Probe::Settled`] or `timeout` elapses.
///
/// Returns immediately when the first probe is already settled. Probe errors
/// (for example an unknown id) abort the wait and are returned as-is. The
/// last sleep is shortened to the remaining budget, so the call returns
/// within `timeout` plus one probe.
pub async fn poll_until<T, F, Fut>(
    settings: &PollSettings,
    timeout: Option<Duration>,
    mut probe: F,
) -> Result<WaitOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    let budget = timeout.unwrap_or(settings.default_timeout);
    let deadline = Instant::now() + budget;

    loop {
        match probe().await? {
            Probe::Settled(value) => return Ok(WaitOutcome::Settled(value)),
            Probe::Pending(value) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(WaitOutcome::TimedOut(value));
                }
                tokio::time::sleep(settings.interval.min(deadline - now)).await;
            }
        }
    }
}
