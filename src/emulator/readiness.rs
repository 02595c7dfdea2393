//! Bounded "wait for readiness" helper
//!
//! Polls a probe at a fixed interval until it reports ready, the attempt
//! budget or the wall-clock timeout runs out, or the probe aborts. The outcome is always explicit:
//! callers decide what a [`Readiness::TimedOut`] means for them.

use crate::config::EmulatorConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Fixed-interval retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Number of probes that fit in the timeout, at least one
    pub fn max_attempts(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        let attempts = self.timeout.as_nanos().div_ceil(self.interval.as_nanos());
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }
}

impl From<&EmulatorConfig> for RetryPolicy {
    fn from(config: &EmulatorConfig) -> Self {
        Self::new(config.poll_interval(), config.startup_timeout())
    }
}

/// Outcome of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32, elapsed: Duration },
    TimedOut { attempts: u32, elapsed: Duration },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Readiness::Ready { attempts, .. } | Readiness::TimedOut { attempts, .. } => *attempts,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Readiness::Ready { elapsed, .. } | Readiness::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

/// Run `probe` until it yields `Ok(true)` or the policy is exhausted.
///
/// `Ok(false)` means "not yet"; an `Err` aborts the wait immediately and is
/// returned to the caller. The wait ends at the first of `max_attempts`
/// probes or `policy.timeout` of wall-clock time. A probe still pending at
/// the deadline is dropped and counts as not ready.
pub async fn wait_until<F, Fut, E>(policy: &RetryPolicy, mut probe: F) -> Result<Readiness, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, probe()).await {
            Ok(outcome) => {
                if outcome? {
                    return Ok(Readiness::Ready {
                        attempts,
                        elapsed: started.elapsed(),
                    });
                }
            }
            Err(_) => tracing::debug!(attempt = attempts, "Probe outlived the deadline"),
        }
        tracing::debug!(attempt = attempts, max_attempts, "Not ready yet");

        let now = Instant::now();
        if attempts >= max_attempts || now >= deadline {
            break;
        }
        tokio::time::sleep(policy.interval.min(deadline - now)).await;
    }

    Ok(Readiness::TimedOut {
        attempts,
        elapsed: started.elapsed(),
    })
}
