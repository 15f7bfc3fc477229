// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::{is_conflict, is_not_found, ManagedResource, ResourceKind};
use crate::constants::{labels, FIELD_MANAGER};
use crate::error::Result;
use crate::kubernetes::workloads::get_opt;
use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{
    api::{DeleteParams, ObjectMeta, PostParams},
    Api, Client,
};
use std::collections::BTreeMap;

/// Cluster-wide storage class backing every persistent volume claim we create
pub struct StorageClassResource {
    client: Client,
    name: String,
    provisioner: String,
}

impl StorageClassResource {
    pub fn new(client: Client, name: impl Into<String>, provisioner: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            provisioner: provisioner.into(),
        }
    }

    fn api(&self) -> Api<StorageClass> {
        Api::all(self.client.clone())
    }

    pub(crate) fn desired(&self) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(BTreeMap::from([(
                    labels::MANAGED_BY.to_string(),
                    FIELD_MANAGER.to_string(),
                )])),
                ..Default::default()
            },
            provisioner: self.provisioner.clone(),
            // Released volumes are kept, never rebound
            reclaim_policy: Some("Retain".to_string()),
            volume_binding_mode: Some("WaitForFirstConsumer".to_string()),
            allow_volume_expansion: Some(true),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ManagedResource for StorageClassResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::StorageClass
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool> {
        Ok(get_opt(&self.api(), &self.name).await?.is_some())
    }

    /// Storage classes have no status; existing is ready
    async fn is_ready(&self) -> Result<bool> {
        self.exists().await
    }

    async fn create(&self) -> Result<()> {
        match self.api().create(&PostParams::default(), &self.desired()).await {
            Ok(_) => Ok(()),
            Err(e) if is_conflict(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, _purge_storage: bool) -> Result<()> {
        match self.api().delete(&self.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockService;

    #[tokio::test]
    async fn test_desired_storage_class() {
        let sc = StorageClassResource::new(
            MockService::new().into_client(),
            "shipyard-local",
            "rancher.io/local-path",
        );
        let desired = sc.desired();

        assert_eq!(desired.metadata.name.as_deref(), Some("shipyard-local"));
        assert_eq!(desired.provisioner, "rancher.io/local-path");
        assert_eq!(desired.reclaim_policy.as_deref(), Some("Retain"));
        assert_eq!(
            desired.volume_binding_mode.as_deref(),
            Some("WaitForFirstConsumer")
        );
    }

    #[tokio::test]
    async fn test_ready_once_it_exists() {
        let body = serde_json::json!({
            "apiVersion": "storage.k8s.io/v1",
            "kind": "StorageClass",
            "metadata": {"name": "shipyard-local"},
            "provisioner": "rancher.io/local-path"
        })
        .to_string();
        let client = MockService::new()
            .on_get("/apis/storage.k8s.io/v1/storageclasses/shipyard-local", 200, &body)
            .into_client();
        let sc = StorageClassResource::new(client, "shipyard-local", "rancher.io/local-path");

        assert!(sc.is_ready().await.unwrap());
    }
}
