// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Bounded polling of readiness probes.
//!
//! A [`RetryPolicy`] describes how often and how many times to probe; [`wait_for`]
//! drives an async probe under that policy. Callers decide what a timeout means.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How a probe is repeated: immediately, then every `interval`, at most `max_attempts` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Probe every `interval` for at most `deadline`: `ceil(deadline / interval)` attempts.
    pub fn within(deadline: Duration, interval: Duration) -> Self {
        let max_attempts = if interval.is_zero() {
            1
        } else {
            deadline.as_nanos().div_ceil(interval.as_nanos()).max(1)
        };

        Self {
            interval,
            max_attempts: u32::try_from(max_attempts).unwrap_or(u32::MAX),
        }
    }

    /// Time of the last probe relative to the first; always below the requested deadline
    pub fn last_probe_at(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Result of a bounded wait. Never an error: the caller picks warn or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            WaitOutcome::Ready { attempts } | WaitOutcome::TimedOut { attempts } => *attempts,
        }
    }
}

/// Poll `probe` under `policy` until it reports `true` or the attempts run out.
///
/// Probe errors are treated as "not ready yet" and logged; a resource that cannot
/// be queried during cold start is indistinguishable from one still starting.
pub async fn wait_for<F, Fut>(what: &str, policy: &RetryPolicy, mut probe: F) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            sleep(policy.interval).await;
        }

        match probe().await {
            Ok(true) => {
                debug!("{} ready after {} attempt(s)", what, attempt);
                return WaitOutcome::Ready { attempts: attempt };
            }
            Ok(false) => {
                debug!(
                    "{} not ready (attempt {}/{})",
                    what, attempt, policy.max_attempts
                );
            }
            Err(e) => {
                warn!(
                    "Error probing {} (attempt {}/{}): {}",
                    what, attempt, policy.max_attempts, e
                );
            }
        }
    }

    WaitOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}
