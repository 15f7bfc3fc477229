// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Infrastructure components installed from Helm charts.
//!
//! A chart resource is identified by the workload it produces: it exists when that
//! Deployment or StatefulSet exists and is ready when all of its replicas are.

use super::{ManagedResource, ResourceKind};
use crate::constants::labels;
use crate::credentials::{generate_password, CredentialKind};
use crate::error::Result;
use crate::helm::{ChartInstaller, ChartRelease};
use crate::kubernetes::secrets::{apply_secret, build_secret, read_secret_value};
use crate::kubernetes::workloads;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{
    api::{DeleteParams, ListParams},
    Api, Client,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// The workload a chart release is judged by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    Deployment(String),
    StatefulSet(String),
}

impl Workload {
    pub fn name(&self) -> &str {
        match self {
            Workload::Deployment(name) | Workload::StatefulSet(name) => name,
        }
    }
}

/// A generated admin password the chart reads through `existingSecret`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSecret {
    pub name: String,
    pub key: String,
}

pub struct ChartResource {
    client: Client,
    installer: Arc<dyn ChartInstaller>,
    kind: ResourceKind,
    release: ChartRelease,
    workload: Workload,
    auth_secret: Option<AuthSecret>,
}

impl ChartResource {
    pub fn new(
        client: Client,
        installer: Arc<dyn ChartInstaller>,
        kind: ResourceKind,
        release: ChartRelease,
        workload: Workload,
    ) -> Self {
        Self {
            client,
            installer,
            kind,
            release,
            workload,
            auth_secret: None,
        }
    }

    pub fn with_auth_secret(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.auth_secret = Some(AuthSecret {
            name: name.into(),
            key: key.into(),
        });
        self
    }

    pub fn release(&self) -> &ChartRelease {
        &self.release
    }

    /// Create the admin auth secret once; an existing password is never replaced
    async fn ensure_auth_secret(&self, auth: &AuthSecret) -> Result<()> {
        let namespace = &self.release.namespace;
        if read_secret_value(&self.client, namespace, &auth.name, &auth.key)
            .await?
            .is_some()
        {
            return Ok(());
        }

        info!(
            "Generating {}-character admin password in secret {}/{}",
            CredentialKind::Password.min_len(),
            namespace,
            auth.name
        );
        let secret = build_secret(
            namespace,
            &auth.name,
            BTreeMap::from([(labels::INSTANCE.to_string(), self.release.name.clone())]),
            BTreeMap::from([(auth.key.clone(), generate_password())]),
        );
        apply_secret(&self.client, &secret).await
    }

    async fn delete_volume_claims(&self) -> Result<()> {
        let pvcs: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &self.release.namespace);
        let selector = format!("{}={}", labels::INSTANCE, self.release.name);

        warn!(
            "Deleting persistent volume claims {} in namespace {}",
            selector, self.release.namespace
        );
        pvcs.delete_collection(
            &DeleteParams::default(),
            &ListParams::default().labels(&selector),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ManagedResource for ChartResource {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn name(&self) -> &str {
        self.workload.name()
    }

    async fn exists(&self) -> Result<bool> {
        let namespace = &self.release.namespace;
        match &self.workload {
            Workload::Deployment(name) => {
                workloads::deployment_exists(&self.client, namespace, name).await
            }
            Workload::StatefulSet(name) => {
                workloads::stateful_set_exists(&self.client, namespace, name).await
            }
        }
    }

    async fn is_ready(&self) -> Result<bool> {
        let namespace = &self.release.namespace;
        match &self.workload {
            Workload::Deployment(name) => {
                workloads::is_deployment_ready(&self.client, namespace, name).await
            }
            Workload::StatefulSet(name) => {
                workloads::is_stateful_set_ready(&self.client, namespace, name).await
            }
        }
    }

    async fn create(&self) -> Result<()> {
        if let Some(auth) = &self.auth_secret {
            self.ensure_auth_secret(auth).await?;
        }
        self.installer.install_or_upgrade(&self.release).await
    }

    async fn delete(&self, purge_storage: bool) -> Result<()> {
        self.installer
            .uninstall(&self.release.name, &self.release.namespace)
            .await?;
        if purge_storage {
            self.delete_volume_claims().await?;
        }
        Ok(())
    }
}
