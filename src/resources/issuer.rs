// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ACME certificate issuer backed by cert-manager

use super::{is_conflict, is_not_found, ManagedResource, ResourceKind};
use crate::constants::FIELD_MANAGER;
use crate::error::{Result, ShipyardError};
use crate::helm::{ChartInstaller, ChartRelease};
use crate::kubernetes::crd::{crd_available, CLUSTER_ISSUER_CRD};
use crate::kubernetes::workloads::{deployment_exists, get_opt};
use crate::types::cluster_issuer::{
    AcmeIssuer, AcmeSolver, ClusterIssuer, ClusterIssuerSpec, Http01Ingress, Http01Solver,
    SecretKeySelector,
};
use crate::wait::{wait_for, RetryPolicy};
use async_trait::async_trait;
use kube::{
    api::{DeleteParams, Patch, PatchParams, PostParams},
    Api, Client,
};
use std::sync::Arc;
use tracing::info;

/// Name of the cert-manager controller deployment created by its chart
const CERT_MANAGER_DEPLOYMENT: &str = "cert-manager";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeSettings {
    pub server: String,
    pub email: String,
    pub ingress_class: String,
}

pub struct CertificateIssuer {
    client: Client,
    installer: Arc<dyn ChartInstaller>,
    name: String,
    /// cert-manager itself, installed on first use
    cert_manager: ChartRelease,
    acme: AcmeSettings,
    /// How long to wait for the ClusterIssuer CRD after installing cert-manager
    crd_wait: RetryPolicy,
}

impl CertificateIssuer {
    pub fn new(
        client: Client,
        installer: Arc<dyn ChartInstaller>,
        name: impl Into<String>,
        cert_manager: ChartRelease,
        acme: AcmeSettings,
        crd_wait: RetryPolicy,
    ) -> Self {
        Self {
            client,
            installer,
            name: name.into(),
            cert_manager,
            acme,
            crd_wait,
        }
    }

    fn api(&self) -> Api<ClusterIssuer> {
        Api::all(self.client.clone())
    }

    pub(crate) fn desired(&self) -> ClusterIssuer {
        ClusterIssuer::new(
            &self.name,
            ClusterIssuerSpec {
                acme: Some(AcmeIssuer {
                    server: self.acme.server.clone(),
                    email: self.acme.email.clone(),
                    private_key_secret_ref: SecretKeySelector {
                        name: format!("{}-account-key", self.name),
                    },
                    solvers: vec![AcmeSolver {
                        http01: Some(Http01Solver {
                            ingress: Http01Ingress {
                                ingress_class_name: Some(self.acme.ingress_class.clone()),
                            },
                        }),
                    }],
                }),
            },
        )
    }

    async fn ensure_cert_manager(&self) -> Result<()> {
        let namespace = &self.cert_manager.namespace;
        if !deployment_exists(&self.client, namespace, CERT_MANAGER_DEPLOYMENT).await? {
            self.installer.install_or_upgrade(&self.cert_manager).await?;
        }

        let client = &self.client;
        let served = wait_for("ClusterIssuer CRD", &self.crd_wait, || async move {
            crd_available(client, CLUSTER_ISSUER_CRD).await
        })
        .await;
        if !served.is_ready() {
            return Err(ShipyardError::TransientUnavailable(format!(
                "ClusterIssuer CRD not served after {} checks; cert-manager may still be starting, rerun to continue",
                served.attempts()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ManagedResource for CertificateIssuer {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ClusterIssuer
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool> {
        match get_opt(&self.api(), &self.name).await {
            Ok(found) => Ok(found.is_some()),
            // Without the CRD there is no issuer either
            Err(ShipyardError::KubeError(e)) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn is_ready(&self) -> Result<bool> {
        Ok(get_opt(&self.api(), &self.name)
            .await?
            .is_some_and(|issuer| issuer.is_ready()))
    }

    async fn create(&self) -> Result<()> {
        self.ensure_cert_manager().await?;

        info!(
            "Creating ClusterIssuer {} for {} (ACME {})",
            self.name, self.acme.email, self.acme.server
        );
        match self.api().create(&PostParams::default(), &self.desired()).await {
            Ok(_) => Ok(()),
            Err(e) if is_conflict(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Server-side apply of the desired issuer
    async fn refresh(&self) -> Result<()> {
        info!("Applying ClusterIssuer {} (ACME {})", self.name, self.acme.server);
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
