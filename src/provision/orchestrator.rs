// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Runs provisioning steps in order and records how each one ended.

use super::{
    is_per_service, prerequisites, ProvisionReport, Step, StepReport, StepState, TimeoutPolicy,
};
use crate::guard::Guard;
use crate::wait::{wait_for, RetryPolicy, WaitOutcome};
use tracing::{debug, error, info, instrument, warn};

pub struct Orchestrator {
    guard: Guard,
    readiness: RetryPolicy,
}

impl Orchestrator {
    pub fn new(guard: Guard, readiness: RetryPolicy) -> Self {
        Self { guard, readiness }
    }

    /// Run every step strictly in order. Never returns early: failures are recorded
    /// and dependents skipped, independent steps still run.
    pub async fn run(&self, steps: &[Step]) -> ProvisionReport {
        let mut report = ProvisionReport::default();

        for step in steps {
            let mut step_report = StepReport::new(step);

            if let Some(reason) = blocked_by(step, &report.steps) {
                warn!("Skipping {}: {}", step.resource.describe(), reason);
                step_report.state = StepState::Skipped;
                step_report.error = Some(reason);
            } else {
                self.run_step(step, &mut step_report).await;
            }

            info!("{}", step_report);
            report.steps.push(step_report);
        }

        report
    }

    #[instrument(skip_all, fields(resource = %step.resource.describe()))]
    async fn run_step(&self, step: &Step, report: &mut StepReport) {
        let description = step.resource.describe();

        report.state = StepState::Ensuring;
        match self.guard.ensure(step.resource.as_ref(), step.action).await {
            Ok(outcome) => report.outcome = Some(outcome),
            Err(e) => {
                error!("{} failed: {}", description, e);
                report.state = StepState::Failed;
                report.error = Some(e.to_string());
                return;
            }
        }

        report.state = StepState::Waiting;
        let mut waited = self.wait_ready(step).await;
        report.attempts = waited.attempts();

        if !waited.is_ready() && step.on_timeout == TimeoutPolicy::RetryOnceThenContinue {
            warn!("{} not ready yet, waiting once more", description);
            waited = self.wait_ready(step).await;
            report.attempts += waited.attempts();
        }

        if waited.is_ready() {
            report.state = StepState::Ready;
            return;
        }

        let message = format!(
            "not ready after {} check(s), {:?} apart; rerun later or raise READY_TIMEOUT_SECS",
            report.attempts, self.readiness.interval
        );
        match step.on_timeout {
            TimeoutPolicy::AbortStep => {
                error!("{} {}", description, message);
                report.state = StepState::Failed;
            }
            TimeoutPolicy::Continue | TimeoutPolicy::RetryOnceThenContinue => {
                warn!("{} {}", description, message);
                report.state = StepState::Degraded;
            }
        }
        report.error = Some(message);
    }

    async fn wait_ready(&self, step: &Step) -> WaitOutcome {
        let resource = step.resource.as_ref();
        wait_for(&resource.describe(), &self.readiness, || async move {
            resource.is_ready().await
        })
        .await
    }
}

/// Why `step` cannot run given the steps finished so far, if it cannot
fn blocked_by(step: &Step, finished: &[StepReport]) -> Option<String> {
    for &kind in prerequisites(step.kind()) {
        let relevant: Vec<&StepReport> = finished
            .iter()
            .filter(|r| r.kind == kind)
            .filter(|r| !is_per_service(kind) || r.service == step.service)
            .collect();

        if relevant.is_empty() {
            return Some(format!("prerequisite {} never ran", kind));
        }
        if let Some(blocker) = relevant.iter().find(|r| r.state.blocks_dependents()) {
            return Some(format!(
                "prerequisite {} '{}' is {}",
                kind, blocker.name, blocker.state
            ));
        }
        for degraded in relevant.iter().filter(|r| r.state == StepState::Degraded) {
            warn!(
                "{} continues although prerequisite {} '{}' is degraded",
                step.resource.describe(),
                kind,
                degraded.name
            );
        }
    }
    debug!("Prerequisites of {} satisfied", step.resource.describe());
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::tests::FakeResource;
    use crate::guard::{EnsureOutcome, ResourceAction};
    use crate::outcome::Outcome;
    use crate::resources::ResourceKind;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn orchestrator(allow_data_loss: bool) -> Orchestrator {
        Orchestrator::new(
            Guard::new(
                allow_data_loss,
                RetryPolicy::within(Duration::from_secs(10), Duration::from_secs(1)),
            ),
            RetryPolicy::within(Duration::from_secs(10), Duration::from_secs(1)),
        )
    }

    fn step(resource: &FakeResource) -> Step {
        Step::new(Box::new(resource.clone()), ResourceAction::Reuse)
    }

    fn infrastructure() -> Vec<FakeResource> {
        vec![
            FakeResource::new(ResourceKind::Namespace, "apps"),
            FakeResource::new(ResourceKind::StorageClass, "shipyard-local"),
            FakeResource::new(ResourceKind::IngressController, "ingress-nginx-controller"),
            FakeResource::new(ResourceKind::ClusterIssuer, "letsencrypt"),
            FakeResource::new(ResourceKind::DatabaseServer, "postgresql"),
            FakeResource::new(ResourceKind::CacheServer, "redis-master"),
            FakeResource::new(ResourceKind::ServiceUser, "game_stats_user"),
            FakeResource::new(ResourceKind::ServiceDatabase, "game_stats"),
            FakeResource::new(ResourceKind::ServiceSecret, "game-stats-api-secrets"),
            FakeResource::new(ResourceKind::GitOpsController, "argocd-server"),
            FakeResource::new(ResourceKind::ApplicationBootstrap, "root"),
        ]
    }

    fn steps(resources: &[FakeResource]) -> Vec<Step> {
        resources
            .iter()
            .map(|r| {
                let s = step(r);
                if is_per_service(r.kind) {
                    s.for_service("game-stats-api")
                } else {
                    s
                }
            })
            .collect()
    }

    fn states(report: &ProvisionReport) -> Vec<StepState> {
        report.steps.iter().map(|s| s.state).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cluster_all_ready() {
        let resources = infrastructure();
        let report = orchestrator(false).run(&steps(&resources)).await;

        assert_eq!(report.outcome(), Outcome::Success);
        assert!(report
            .steps
            .iter()
            .all(|s| s.outcome == Some(EnsureOutcome::Created) && s.attempts == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_runs_create_nothing_new() {
        let resources = infrastructure();
        let orchestrator = orchestrator(false);

        for _ in 0..3 {
            let report = orchestrator.run(&steps(&resources)).await;
            assert_eq!(report.outcome(), Outcome::Success);
        }

        for resource in &resources {
            assert_eq!(resource.creates.load(Ordering::SeqCst), 1, "{}", resource.name);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_database_server_skips_service_steps_only() {
        let mut resources = infrastructure();
        resources[4].fail_create = true;

        let report = orchestrator(false).run(&steps(&resources)).await;

        assert_eq!(
            states(&report),
            vec![
                StepState::Ready,
                StepState::Ready,
                StepState::Ready,
                StepState::Ready,
                StepState::Failed,
                StepState::Ready,
                StepState::Skipped,
                StepState::Skipped,
                StepState::Skipped,
                StepState::Ready,
                StepState::Ready,
            ]
        );
        assert_eq!(report.outcome(), Outcome::Failed);
        assert_eq!(report.unresolved().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_ingress_degrades_without_blocking() {
        let resources = infrastructure();
        resources[2].ready.store(false, Ordering::SeqCst);

        let report = orchestrator(false).run(&steps(&resources)).await;

        assert_eq!(report.steps[2].state, StepState::Degraded);
        assert_eq!(report.steps[2].attempts, 10);
        assert_eq!(report.steps[3].state, StepState::Ready);
        assert_eq!(report.steps[9].state, StepState::Ready);
        assert_eq!(report.outcome(), Outcome::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_database_server_waits_twice_before_degrading() {
        let resources = infrastructure();
        resources[4].ready.store(false, Ordering::SeqCst);

        let report = orchestrator(false).run(&steps(&resources)).await;

        assert_eq!(report.steps[4].state, StepState::Degraded);
        assert_eq!(report.steps[4].attempts, 20);
        // Service steps still run against a degraded server
        assert_eq!(report.steps[6].state, StepState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_secret_timeout_fails_step() {
        let resources = infrastructure();
        resources[8].ready.store(false, Ordering::SeqCst);

        let report = orchestrator(false).run(&steps(&resources)).await;

        assert_eq!(report.steps[8].state, StepState::Failed);
        assert!(report.steps[8]
            .error
            .as_deref()
            .unwrap()
            .contains("READY_TIMEOUT_SECS"));
        assert_eq!(report.steps[10].state, StepState::Ready);
        assert_eq!(report.outcome(), Outcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_service_failures_are_isolated() {
        let failing_user = FakeResource {
            fail_create: true,
            ..FakeResource::new(ResourceKind::ServiceUser, "chat_user")
        };
        let plan = vec![
            step(&FakeResource::new(ResourceKind::StorageClass, "local")),
            step(&FakeResource::new(ResourceKind::DatabaseServer, "postgresql")),
            step(&failing_user).for_service("chat-web"),
            step(&FakeResource::new(ResourceKind::ServiceDatabase, "chat")).for_service("chat-web"),
            step(&FakeResource::new(ResourceKind::ServiceUser, "game_stats_user"))
                .for_service("game-stats-api"),
            step(&FakeResource::new(ResourceKind::ServiceDatabase, "game_stats"))
                .for_service("game-stats-api"),
        ];

        let report = orchestrator(false).run(&plan).await;

        assert_eq!(
            states(&report),
            vec![
                StepState::Ready,
                StepState::Ready,
                StepState::Failed,
                StepState::Skipped,
                StepState::Ready,
                StepState::Ready,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_prerequisite_skips() {
        let plan = vec![step(&FakeResource::new(
            ResourceKind::ApplicationBootstrap,
            "root",
        ))];

        let report = orchestrator(false).run(&plan).await;

        assert_eq!(report.steps[0].state, StepState::Skipped);
        assert!(report.steps[0].error.as_deref().unwrap().contains("never ran"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreate_database_server_with_data_loss_opt_in() {
        let server = FakeResource::existing(ResourceKind::DatabaseServer, "postgresql");
        server.has_data.store(true, Ordering::SeqCst);
        let plan = vec![
            step(&FakeResource::existing(ResourceKind::StorageClass, "local")),
            Step::new(Box::new(server.clone()), ResourceAction::Recreate),
        ];

        let report = orchestrator(true).run(&plan).await;

        assert_eq!(report.steps[1].outcome, Some(EnsureOutcome::Recreated));
        assert_eq!(report.steps[1].state, StepState::Ready);
        assert_eq!(server.log(), vec!["delete(purge=true)", "create"]);
        assert!(!server.has_data.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreate_database_server_without_opt_in_touches_nothing() {
        let server = FakeResource::existing(ResourceKind::DatabaseServer, "postgresql");
        server.has_data.store(true, Ordering::SeqCst);
        let plan = vec![
            step(&FakeResource::existing(ResourceKind::StorageClass, "local")),
            Step::new(Box::new(server.clone()), ResourceAction::Recreate),
        ];

        let report = orchestrator(false).run(&plan).await;

        assert_eq!(report.steps[1].state, StepState::Failed);
        assert!(report.steps[1]
            .error
            .as_deref()
            .unwrap()
            .contains("ALLOW_DATA_LOSS"));
        assert!(server.log().is_empty());
        assert!(server.has_data.load(Ordering::SeqCst));
    }
}
