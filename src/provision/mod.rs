// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Dependency-ordered provisioning of cluster infrastructure.

pub mod orchestrator;
pub mod plan;

use crate::guard::{EnsureOutcome, ResourceAction};
use crate::outcome::Outcome;
use crate::resources::{ManagedResource, ResourceKind};
use std::fmt;

pub use orchestrator::Orchestrator;
pub use plan::build_plan;

/// Lifecycle of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    NotStarted,
    Ensuring,
    Waiting,
    Ready,
    /// Readiness timed out under a warn-and-continue policy
    Degraded,
    Failed,
    /// A prerequisite failed, was skipped, or never ran
    Skipped,
}

impl StepState {
    /// Dependents of a step in this state are skipped
    pub fn blocks_dependents(self) -> bool {
        matches!(
            self,
            StepState::Failed | StepState::Skipped | StepState::NotStarted
        )
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepState::NotStarted => "not started",
            StepState::Ensuring => "ensuring",
            StepState::Waiting => "waiting",
            StepState::Ready => "ready",
            StepState::Degraded => "degraded",
            StepState::Failed => "failed",
            StepState::Skipped => "skipped",
        })
    }
}

/// What a readiness timeout means for a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Warn and continue
    Continue,
    /// Wait a second time, then warn and continue
    RetryOnceThenContinue,
    /// Fail this step; later independent steps still run
    AbortStep,
}

impl TimeoutPolicy {
    pub fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::DatabaseServer | ResourceKind::CacheServer => {
                TimeoutPolicy::RetryOnceThenContinue
            }
            ResourceKind::ServiceUser
            | ResourceKind::ServiceDatabase
            | ResourceKind::ServiceSecret => TimeoutPolicy::AbortStep,
            _ => TimeoutPolicy::Continue,
        }
    }
}

/// Kinds that must have finished before `kind` starts
pub fn prerequisites(kind: ResourceKind) -> &'static [ResourceKind] {
    use ResourceKind::*;
    match kind {
        Namespace | StorageClass => &[],
        IngressController | DatabaseServer | CacheServer => &[StorageClass],
        ClusterIssuer => &[IngressController],
        ServiceUser => &[DatabaseServer],
        ServiceDatabase => &[ServiceUser],
        ServiceSecret => &[ServiceDatabase],
        GitOpsController => &[IngressController, ClusterIssuer],
        ApplicationBootstrap => &[GitOpsController],
    }
}

/// Kinds that exist once per service rather than once per cluster
pub fn is_per_service(kind: ResourceKind) -> bool {
    matches!(
        kind,
        ResourceKind::ServiceUser | ResourceKind::ServiceDatabase | ResourceKind::ServiceSecret
    )
}

/// A resource, the action to take on it, and how to treat a readiness timeout
pub struct Step {
    pub resource: Box<dyn ManagedResource>,
    pub action: ResourceAction,
    pub on_timeout: TimeoutPolicy,
    /// Owning service for per-service steps
    pub service: Option<String>,
}

impl Step {
    pub fn new(resource: Box<dyn ManagedResource>, action: ResourceAction) -> Self {
        let on_timeout = TimeoutPolicy::for_kind(resource.kind());
        Self {
            resource,
            action,
            on_timeout,
            service: None,
        }
    }

    pub fn for_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.resource.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub kind: ResourceKind,
    pub name: String,
    pub service: Option<String>,
    pub state: StepState,
    pub outcome: Option<EnsureOutcome>,
    /// Readiness probes made, across retries
    pub attempts: u32,
    pub error: Option<String>,
}

impl StepReport {
    pub(crate) fn new(step: &Step) -> Self {
        Self {
            kind: step.kind(),
            name: step.resource.name().to_string(),
            service: step.service.clone(),
            state: StepState::NotStarted,
            outcome: None,
            attempts: 0,
            error: None,
        }
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.kind, self.name, self.state)?;
        if let Some(outcome) = self.outcome {
            write!(f, " ({}, {} readiness check(s))", outcome, self.attempts)?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub steps: Vec<StepReport>,
}

impl ProvisionReport {
    pub fn outcome(&self) -> Outcome {
        self.steps
            .iter()
            .map(|s| match s.state {
                StepState::Ready => Outcome::Success,
                StepState::Failed | StepState::Skipped | StepState::NotStarted => {
                    Outcome::Failed
                }
                _ => Outcome::Degraded,
            })
            .max()
            .unwrap_or(Outcome::Success)
    }

    /// Steps that did not end `Ready`
    pub fn unresolved(&self) -> Vec<&StepReport> {
        self.steps
            .iter()
            .filter(|s| s.state != StepState::Ready)
            .collect()
    }
}
