// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cross-repository secret propagation.
//!
//! Secrets live in one source repository. A consumer repository that lacks some of
//! them asks the source to export each missing one (a dispatch event) and then polls
//! its own inventory until the names appear or the window closes.

pub mod github;
pub mod inventory;
pub mod protocol;

use crate::error::{Result, ShipyardError};
use std::fmt;
use std::str::FromStr;

pub use github::{GitHubClient, SourceControl};
pub use inventory::SecretInventory;
pub use protocol::{
    DispatchEvent, PropagationReport, PropagationRequest, Propagator, SecretState,
};

/// `owner/name` of a hosted repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoRef {
    type Err = ShipyardError;

    fn from_str(s: &str) -> Result<Self> {
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };

        match s.trim().split_once('/') {
            Some((owner, name)) if valid(owner) && valid(name) => Ok(RepoRef {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(ShipyardError::InvalidRepository(format!(
                "'{}' is not of the form owner/name",
                s
            ))),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_ref() {
        let repo: RepoRef = "acme/game-stats-api".parse().unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.name, "game-stats-api");
        assert_eq!(repo.to_string(), "acme/game-stats-api");
    }

    #[test]
    fn test_reject_malformed_repo_ref() {
        for bad in ["", "acme", "/name", "acme/", "acme/a/b", "acme/na me"] {
            assert!(
                matches!(bad.parse::<RepoRef>(), Err(ShipyardError::InvalidRepository(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
