// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Create / reuse / recreate decisions for managed resources.
//!
//! The guard is the only code path that mutates cluster state.

use crate::error::{Result, ShipyardError};
use crate::resources::{ManagedResource, ResourceKind};
use crate::wait::{wait_for, RetryPolicy};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// What to do with a resource that may already exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAction {
    /// Keep an existing resource untouched
    Reuse,
    /// Re-apply desired state in place (non-destructive)
    Refresh,
    /// Delete, then create fresh
    Recreate,
    FailIfExists,
}

impl std::str::FromStr for ResourceAction {
    type Err = ShipyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reuse" => Ok(ResourceAction::Reuse),
            "refresh" => Ok(ResourceAction::Refresh),
            "recreate" => Ok(ResourceAction::Recreate),
            "fail" | "fail-if-exists" => Ok(ResourceAction::FailIfExists),
            other => Err(ShipyardError::ConfigError(format!(
                "unknown resource action '{}', expected reuse, refresh, recreate or fail",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Reused,
    Updated,
    Recreated,
}

impl fmt::Display for EnsureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnsureOutcome::Created => "created",
            EnsureOutcome::Reused => "reused",
            EnsureOutcome::Updated => "updated",
            EnsureOutcome::Recreated => "recreated",
        })
    }
}

/// Per-kind actions, decided once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPlan {
    default: ResourceAction,
    overrides: HashMap<ResourceKind, ResourceAction>,
    /// Explicit opt-in for recreating stateful resources
    pub allow_data_loss: bool,
}

impl ActionPlan {
    pub fn new(default: ResourceAction, allow_data_loss: bool) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            allow_data_loss,
        }
    }

    pub fn with_action(mut self, kind: ResourceKind, action: ResourceAction) -> Self {
        self.overrides.insert(kind, action);
        self
    }

    pub fn action_for(&self, kind: ResourceKind) -> ResourceAction {
        self.overrides.get(&kind).copied().unwrap_or(self.default)
    }

    /// Upgrade `Reuse` to `Refresh` for `kind`; stronger actions are kept.
    pub fn refreshed(&self, kind: ResourceKind) -> ResourceAction {
        match self.action_for(kind) {
            ResourceAction::Reuse => ResourceAction::Refresh,
            other => other,
        }
    }
}

impl Default for ActionPlan {
    fn default() -> Self {
        Self::new(ResourceAction::Reuse, false)
    }
}

pub struct Guard {
    allow_data_loss: bool,
    /// How long to wait for a deleted resource to disappear
    deletion: RetryPolicy,
}

impl Guard {
    pub fn new(allow_data_loss: bool, deletion: RetryPolicy) -> Self {
        Self {
            allow_data_loss,
            deletion,
        }
    }

    /// Bring `resource` into existence according to `action`.
    #[instrument(skip(self, resource), fields(resource = %resource.describe()))]
    pub async fn ensure(
        &self,
        resource: &dyn ManagedResource,
        action: ResourceAction,
    ) -> Result<EnsureOutcome> {
        let description = resource.describe();

        match action {
            ResourceAction::Reuse => {
                if resource.exists().await? {
                    debug!("{} already exists, reusing", description);
                    return Ok(EnsureOutcome::Reused);
                }
                info!("Creating {}", description);
                resource.create().await?;
                Ok(EnsureOutcome::Created)
            }
            ResourceAction::Refresh => {
                if resource.exists().await? {
                    info!("Refreshing {}", description);
                    resource.refresh().await?;
                    return Ok(EnsureOutcome::Updated);
                }
                info!("Creating {}", description);
                resource.create().await?;
                Ok(EnsureOutcome::Created)
            }
            ResourceAction::FailIfExists => {
                if resource.exists().await? {
                    return Err(ShipyardError::ResourceAlreadyExists(format!(
                        "{} exists and existing resources are configured to fail; \
                         remove it or rerun with EXISTING_RESOURCES=reuse",
                        description
                    )));
                }
                info!("Creating {}", description);
                resource.create().await?;
                Ok(EnsureOutcome::Created)
            }
            ResourceAction::Recreate => self.recreate(resource).await,
        }
    }

    async fn recreate(&self, resource: &dyn ManagedResource) -> Result<EnsureOutcome> {
        let description = resource.describe();
        let stateful = resource.kind().is_stateful();

        if stateful && !self.allow_data_loss {
            return Err(ShipyardError::DestructiveOperationRequested(format!(
                "recreating {} deletes its data; rerun with ALLOW_DATA_LOSS=true \
                 (or --allow-data-loss) to confirm",
                description
            )));
        }

        let existed = resource.exists().await?;
        if stateful {
            warn!("Deleting {} and its storage (cleanup mode)", description);
        } else {
            info!("Deleting {} (cleanup mode)", description);
        }
        resource.delete(stateful).await?;

        let gone = wait_for(&description, &self.deletion, || async move {
            resource.exists().await.map(|exists| !exists)
        })
        .await;
        if !gone.is_ready() {
            return Err(ShipyardError::TransientUnavailable(format!(
                "{} still exists after {} deletion checks ({:?} apart); rerun once it is gone",
                description,
                gone.attempts(),
                self.deletion.interval
            )));
        }

        info!("Creating {}", description);
        resource.create().await?;

        Ok(if existed {
            EnsureOutcome::Recreated
        } else {
            EnsureOutcome::Created
        })
    }
}
