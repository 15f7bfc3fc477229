// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Overall result of an invocation and the status line printed for callers.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    Success,
    /// Something did not converge but the run may continue
    Degraded,
    Failed,
}

impl Outcome {
    /// `0` for success or degraded, `1` for failed
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success | Outcome::Degraded => 0,
            Outcome::Failed => 1,
        }
    }

    /// Machine-parsable summary, e.g. `status=degraded unresolved=2`
    pub fn status_line(self, unresolved: usize) -> String {
        format!("status={} unresolved={}", self, unresolved)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Success => "success",
            Outcome::Degraded => "degraded",
            Outcome::Failed => "failed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        assert_eq!(Outcome::Success.status_line(0), "status=success unresolved=0");
        assert_eq!(Outcome::Failed.status_line(2), "status=failed unresolved=2");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Outcome::Success.exit_code(), 0);
        assert_eq!(Outcome::Degraded.exit_code(), 0);
        assert_eq!(Outcome::Failed.exit_code(), 1);
    }

    #[test]
    fn test_worst_outcome_orders_last() {
        let worst = [Outcome::Success, Outcome::Failed, Outcome::Degraded]
            .into_iter()
            .max();
        assert_eq!(worst, Some(Outcome::Failed));
    }
}
