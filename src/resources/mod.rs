// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster resources managed by the provisioning orchestrator.
//!
//! Every resource exposes side-effect-free existence and readiness probes plus the
//! mutations the [`Guard`](crate::guard::Guard) may invoke on it.

pub mod bootstrap;
pub mod chart;
pub mod database;
pub mod issuer;
pub mod namespace;
pub mod service_secret;
pub mod storage_class;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

pub use bootstrap::ApplicationBootstrap;
pub use chart::{ChartResource, Workload};
pub use database::{PodSqlExecutor, ServiceDatabase, ServiceUser, SqlExecutor};
pub use issuer::CertificateIssuer;
pub use namespace::NamespaceResource;
pub use service_secret::ServiceSecret;
pub use storage_class::StorageClassResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Namespace,
    StorageClass,
    IngressController,
    ClusterIssuer,
    DatabaseServer,
    CacheServer,
    ServiceUser,
    ServiceDatabase,
    ServiceSecret,
    GitOpsController,
    ApplicationBootstrap,
}

impl ResourceKind {
    /// Resources whose deletion loses data
    pub fn is_stateful(self) -> bool {
        matches!(
            self,
            ResourceKind::DatabaseServer | ResourceKind::CacheServer | ResourceKind::ServiceDatabase
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::StorageClass => "storage class",
            ResourceKind::IngressController => "ingress controller",
            ResourceKind::ClusterIssuer => "certificate issuer",
            ResourceKind::DatabaseServer => "database server",
            ResourceKind::CacheServer => "cache server",
            ResourceKind::ServiceUser => "service user",
            ResourceKind::ServiceDatabase => "service database",
            ResourceKind::ServiceSecret => "service secret",
            ResourceKind::GitOpsController => "GitOps controller",
            ResourceKind::ApplicationBootstrap => "application bootstrap",
        };
        f.write_str(name)
    }
}

/// A cluster object (or group of objects) with an idempotent lifecycle.
///
/// `exists` and `is_ready` must be free of side effects and safe to call repeatedly.
/// `delete` must tolerate the resource being absent.
#[async_trait]
pub trait ManagedResource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Idempotency key, e.g. the deployment or database name
    fn name(&self) -> &str;

    async fn exists(&self) -> Result<bool>;

    async fn is_ready(&self) -> Result<bool>;

    async fn create(&self) -> Result<()>;

    /// Re-apply desired state to an existing resource without destroying it
    async fn refresh(&self) -> Result<()> {
        self.create().await
    }

    /// Remove the resource; `purge_storage` also drops backing volumes
    async fn delete(&self, purge_storage: bool) -> Result<()>;

    fn describe(&self) -> String {
        format!("{} '{}'", self.kind(), self.name())
    }
}

/// `true` for a 404 from the API server
pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

/// `true` for a 409 from the API server
pub(crate) fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}
