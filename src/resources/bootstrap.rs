// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Root Argo CD application that hands the cluster over to GitOps.

use super::{is_conflict, is_not_found, ManagedResource, ResourceKind};
use crate::constants::FIELD_MANAGER;
use crate::error::{Result, ShipyardError};
use crate::kubernetes::crd::{crd_available, APPLICATION_CRD};
use crate::kubernetes::workloads::get_opt;
use crate::types::application::{
    Application, ApplicationDestination, ApplicationSource, ApplicationSpec, AutomatedSync,
    SyncPolicy,
};
use crate::wait::{wait_for, RetryPolicy};
use async_trait::async_trait;
use kube::{
    api::{DeleteParams, Patch, PatchParams, PostParams},
    Api, Client,
};
use tracing::info;

/// In-cluster API server address as Argo CD knows it
const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSource {
    pub repo_url: String,
    pub path: String,
    pub revision: String,
}

pub struct ApplicationBootstrap {
    client: Client,
    namespace: String,
    name: String,
    source: BootstrapSource,
    /// Namespace the synced manifests default to
    destination_namespace: String,
    crd_wait: RetryPolicy,
}

impl ApplicationBootstrap {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        name: impl Into<String>,
        source: BootstrapSource,
        destination_namespace: impl Into<String>,
        crd_wait: RetryPolicy,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
            source,
            destination_namespace: destination_namespace.into(),
            crd_wait,
        }
    }

    fn api(&self) -> Api<Application> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub(crate) fn desired(&self) -> Application {
        let mut app = Application::new(
            &self.name,
            ApplicationSpec {
                project: "default".to_string(),
                source: ApplicationSource {
                    repo_url: self.source.repo_url.clone(),
                    path: self.source.path.clone(),
                    target_revision: self.source.revision.clone(),
                },
                destination: ApplicationDestination {
                    server: IN_CLUSTER_SERVER.to_string(),
                    namespace: self.destination_namespace.clone(),
                },
                sync_policy: Some(SyncPolicy {
                    automated: Some(AutomatedSync {
                        prune: true,
                        self_heal: true,
                    }),
                }),
            },
        );
        app.metadata.namespace = Some(self.namespace.clone());
        app
    }

    async fn wait_for_crd(&self) -> Result<()> {
        let client = &self.client;
        let served = wait_for("Application CRD", &self.crd_wait, || async move {
            crd_available(client, APPLICATION_CRD).await
        })
        .await;
        if !served.is_ready() {
            return Err(ShipyardError::TransientUnavailable(format!(
                "Application CRD not served after {} checks; is Argo CD installed in {}?",
                served.attempts(),
                self.namespace
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ManagedResource for ApplicationBootstrap {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ApplicationBootstrap
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool> {
        match get_opt(&self.api(), &self.name).await {
            Ok(found) => Ok(found.is_some()),
            Err(ShipyardError::KubeError(e)) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn is_ready(&self) -> Result<bool> {
        Ok(get_opt(&self.api(), &self.name)
            .await?
            .is_some_and(|app| app.is_healthy()))
    }

    async fn create(&self) -> Result<()> {
        self.wait_for_crd().await?;

        info!(
            "Creating application {}/{} from {} ({} @ {})",
            self.namespace, self.name, self.source.repo_url, self.source.path, self.source.revision
        );
        match self.api().create(&PostParams::default(), &self.desired()).await {
            Ok(_) => Ok(()),
            Err(e) if is_conflict(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(&self) -> Result<()> {
        let pp = PatchParams::apply(FIELD_MANAGER).force();
        self.api()
            .patch(&self.name, &pp, &Patch::Apply(&self.desired()))
            .await?;
        Ok(())
    }

    async fn delete(&self, _purge_storage: bool) -> Result<()> {
        match self.api().delete(&self.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
