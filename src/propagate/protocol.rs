// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Dispatch-then-poll propagation of missing secrets.
//!
//! Per secret: `Checking -> Present | Missing`; a missing secret moves to
//! `DispatchSent` (or `DispatchFailed`), then `Polling`, and ends `Synced` or
//! `TimedOut`. Nothing is persisted; every invocation recomputes the plan.

use super::inventory::validate_name;
use super::{RepoRef, SourceControl};
use crate::config::ExecutionContext;
use crate::error::{Result, ShipyardError};
use crate::outcome::Outcome;
use crate::wait::{wait_for, RetryPolicy};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretState {
    Checking,
    Present,
    Missing,
    DispatchSent,
    DispatchFailed,
    Polling,
    Synced,
    TimedOut,
}

impl SecretState {
    /// Present before we started or delivered by the source
    pub fn is_resolved(self) -> bool {
        matches!(self, SecretState::Present | SecretState::Synced)
    }
}

impl fmt::Display for SecretState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SecretState::Checking => "checking",
            SecretState::Present => "present",
            SecretState::Missing => "missing",
            SecretState::DispatchSent => "dispatch sent",
            SecretState::DispatchFailed => "dispatch failed",
            SecretState::Polling => "polling",
            SecretState::Synced => "synced",
            SecretState::TimedOut => "timed out",
        })
    }
}

/// Secrets a target repository needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationRequest {
    pub target: RepoRef,
    names: BTreeSet<String>,
}

impl PropagationRequest {
    /// Names are validated and normalised to upper case
    pub fn new<I, S>(target: RepoRef, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| validate_name(n.as_ref().trim()))
            .collect::<Result<BTreeSet<_>>>()
            .map_err(|e| ShipyardError::ConfigError(format!("requested secret: {}", e)))?;
        Ok(Self { target, names })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Request to the source repository to export one secret to a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEvent {
    pub source: RepoRef,
    pub secret_name: String,
    pub target: RepoRef,
    pub correlation_token: Uuid,
}

impl DispatchEvent {
    pub fn new(source: RepoRef, secret_name: impl Into<String>, target: RepoRef) -> Self {
        Self {
            source,
            secret_name: secret_name.into(),
            target,
            correlation_token: Uuid::new_v4(),
        }
    }

    /// `client_payload` of the dispatch request
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "secret_name": self.secret_name,
            "target_repository": self.target.to_string(),
            "correlation_token": self.correlation_token.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReport {
    pub name: String,
    pub state: SecretState,
    /// Inventory polls made before the secret appeared (or until the window closed)
    pub polls: u32,
}

#[derive(Debug, Clone)]
pub struct PropagationReport {
    pub source: RepoRef,
    pub target: RepoRef,
    pub context: ExecutionContext,
    pub window: Duration,
    pub actions_url: String,
    pub secrets: Vec<SecretReport>,
}

impl PropagationReport {
    fn names_in(&self, pred: impl Fn(SecretState) -> bool) -> Vec<&str> {
        self.secrets
            .iter()
            .filter(|s| pred(s.state))
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn present(&self) -> Vec<&str> {
        self.names_in(|s| s == SecretState::Present)
    }

    /// Everything that was missing when the run started
    pub fn missing(&self) -> Vec<&str> {
        self.names_in(|s| s != SecretState::Present)
    }

    pub fn unresolved(&self) -> Vec<&str> {
        self.names_in(|s| !s.is_resolved())
    }

    pub fn outcome(&self) -> Outcome {
        if self.unresolved().is_empty() {
            Outcome::Success
        } else if self.context == ExecutionContext::Automated {
            Outcome::Failed
        } else {
            Outcome::Degraded
        }
    }

    /// Error describing unresolved secrets, if any
    pub fn failure(&self) -> Option<ShipyardError> {
        let unresolved = self.unresolved();
        if unresolved.is_empty() {
            return None;
        }
        Some(ShipyardError::PropagationTimeout(format!(
            "{} secret(s) missing from {} after {}s: {}; check the export runs at {} and rerun",
            unresolved.len(),
            self.target,
            self.window.as_secs(),
            unresolved.join(", "),
            self.actions_url
        )))
    }
}

/// Runs the protocol against one source repository
pub struct Propagator<'a> {
    scm: &'a dyn SourceControl,
    source: RepoRef,
    policy: RetryPolicy,
    context: ExecutionContext,
}

impl<'a> Propagator<'a> {
    pub fn new(
        scm: &'a dyn SourceControl,
        source: RepoRef,
        policy: RetryPolicy,
        context: ExecutionContext,
    ) -> Self {
        Self {
            scm,
            source,
            policy,
            context,
        }
    }

    #[instrument(skip(self, request), fields(target = %request.target, source = %self.source))]
    pub async fn run(&self, request: &PropagationRequest) -> Result<PropagationReport> {
        let target = &request.target;

        let mut states: BTreeMap<String, SecretState> = request
            .names()
            .map(|n| (n.to_string(), SecretState::Checking))
            .collect();
        let inventory = self.scm.list_secrets(target).await?;
        for (name, state) in states.iter_mut() {
            *state = if inventory.contains(name) {
                SecretState::Present
            } else {
                SecretState::Missing
            };
        }

        let missing: Vec<String> = names_with(&states, SecretState::Missing);
        info!(
            "{}: {} present, {} missing {:?}",
            target,
            states.len() - missing.len(),
            missing.len(),
            missing
        );

        for name in &missing {
            let event = DispatchEvent::new(self.source.clone(), name, target.clone());
            let state = match self.scm.dispatch(&event).await {
                Ok(()) => {
                    info!(
                        "Requested export of {} from {} (correlation {})",
                        name, self.source, event.correlation_token
                    );
                    SecretState::DispatchSent
                }
                Err(e @ ShipyardError::MissingCredential(_)) => return Err(e),
                Err(e) => {
                    warn!("Dispatch for {} failed: {}", name, e);
                    SecretState::DispatchFailed
                }
            };
            states.insert(name.clone(), state);
        }

        let polls = self.poll(target, &mut states).await;

        let report = PropagationReport {
            source: self.source.clone(),
            target: target.clone(),
            context: self.context,
            window: self.policy.interval * self.policy.max_attempts,
            actions_url: self.scm.actions_url(&self.source),
            secrets: states
                .into_iter()
                .map(|(name, state)| SecretReport {
                    polls: polls.get(&name).copied().unwrap_or(0),
                    name,
                    state,
                })
                .collect(),
        };

        if let Some(failure) = report.failure() {
            match report.outcome() {
                Outcome::Failed => error!("{}", failure),
                _ => warn!("{}", failure),
            }
        }
        Ok(report)
    }

    /// Poll the target inventory until every dispatched secret appears
    async fn poll(
        &self,
        target: &RepoRef,
        states: &mut BTreeMap<String, SecretState>,
    ) -> BTreeMap<String, u32> {
        let mut waiting = BTreeSet::new();
        for (name, state) in states.iter_mut() {
            if *state == SecretState::DispatchSent {
                *state = SecretState::Polling;
                waiting.insert(name.clone());
            }
        }
        if waiting.is_empty() {
            return BTreeMap::new();
        }

        let pending = Mutex::new(waiting);
        let synced_at = Mutex::new(BTreeMap::new());
        let attempts = AtomicU32::new(0);
        let scm = self.scm;
        let (pending_ref, synced_ref, attempts_ref) = (&pending, &synced_at, &attempts);
        let outcome = wait_for("dispatched secrets", &self.policy, || async move {
            let n = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            let inventory = scm.list_secrets(target).await?;

            let mut pending = pending_ref.lock().unwrap_or_else(|e| e.into_inner());
            let mut synced_at = synced_ref.lock().unwrap_or_else(|e| e.into_inner());
            pending.retain(|name: &String| {
                if inventory.contains(name) {
                    info!("{} arrived in {} after {} poll(s)", name, target, n);
                    synced_at.insert(name.clone(), n);
                    false
                } else {
                    true
                }
            });
            Ok(pending.is_empty())
        })
        .await;

        let synced_at = synced_at.into_inner().unwrap_or_else(|e| e.into_inner());
        let mut polls = BTreeMap::new();
        for (name, state) in states.iter_mut() {
            if *state != SecretState::Polling {
                continue;
            }
            match synced_at.get(name) {
                Some(n) => {
                    *state = SecretState::Synced;
                    polls.insert(name.clone(), *n);
                }
                None => {
                    *state = SecretState::TimedOut;
                    polls.insert(name.clone(), outcome.attempts());
                }
            }
        }
        polls
    }
}

fn names_with(states: &BTreeMap<String, SecretState>, wanted: SecretState) -> Vec<String> {
    states
        .iter()
        .filter(|(_, s)| **s == wanted)
        .map(|(n, _)| n.clone())
        .collect()
}
