//! Bounded fixed-interval polling of a remote status.
//!
//! A poll is not a retry: the check itself succeeds each time and reports
//! whether the remote work is ready, still pending, or failed. The loop stops
//! after `max_attempts` checks and sleeps only between attempts.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Interval and attempt bound for a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between consecutive checks.
    pub interval: Duration,
    /// Maximum number of checks (including the first).
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 30,
        }
    }
}

impl PollPolicy {
    /// Creates a new policy.
    #[must_use]
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Sets the interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the attempt bound.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Upper bound on the total time spent sleeping.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// What a single check observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T> {
    /// The remote work finished.
    Ready(T),
    /// Not finished yet.
    Pending,
    /// The remote work reached a terminal failure.
    Failed(String),
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// A check reported ready.
    Ready {
        /// The value carried by the ready check.
        value: T,
        /// Number of checks made.
        attempts: u32,
    },
    /// A check reported a terminal failure.
    Failed {
        /// Failure reason from the check.
        reason: String,
        /// Number of checks made.
        attempts: u32,
    },
    /// Every attempt reported pending.
    Exhausted {
        /// Number of checks made.
        attempts: u32,
    },
}

impl<T> PollOutcome<T> {
    /// Number of checks made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts, .. }
            | Self::Failed { attempts, .. }
            | Self::Exhausted { attempts } => *attempts,
        }
    }

    /// Returns true if the loop ended ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Source of suspension for poll loops.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Suspends for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that returns immediately and records every requested sleep.
#[derive(Debug, Default)]
pub struct ManualClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    /// Creates a new manual clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sleep requested so far.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Sum of all requested sleeps.
    #[must_use]
    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

/// Checks until ready, failed, or out of attempts.
///
/// Check errors are not retried; they end the loop and are returned as-is.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    clock: &dyn Clock,
    mut check: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStep<T>, E>>,
{
    let mut attempt = 0;
    while attempt < policy.max_attempts {
        if attempt > 0 {
            clock.sleep(policy.interval).await;
        }
        attempt += 1;

        match check(attempt).await? {
            PollStep::Ready(value) => {
                return Ok(PollOutcome::Ready {
                    value,
                    attempts: attempt,
                })
            }
            PollStep::Failed(reason) => {
                return Ok(PollOutcome::Failed {
                    reason,
                    attempts: attempt,
                })
            }
            PollStep::Pending => {
                tracing::debug!(
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    "Still pending"
                );
            }
        }
    }

    Ok(PollOutcome::Exhausted { attempts: attempt })
}
