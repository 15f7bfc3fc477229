// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace management

use super::{is_conflict, is_not_found, ManagedResource, ResourceKind};
use crate::constants::{labels, FIELD_MANAGER};
use crate::error::Result;
use crate::kubernetes::workloads::get_opt;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{DeleteParams, ObjectMeta, PostParams},
    Api, Client,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct NamespaceResource {
    client: Client,
    name: String,
}

impl NamespaceResource {
    pub fn new(client: Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    fn api(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ManagedResource for NamespaceResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Namespace
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool> {
        Ok(get_opt(&self.api(), &self.name).await?.is_some())
    }

    async fn is_ready(&self) -> Result<bool> {
        Ok(get_opt(&self.api(), &self.name).await?.is_some_and(|ns| {
            ns.status
                .and_then(|s| s.phase)
                .is_some_and(|phase| phase == "Active")
        }))
    }

    async fn create(&self) -> Result<()> {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(BTreeMap::from([(
                    labels::MANAGED_BY.to_string(),
                    FIELD_MANAGER.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        match self.api().create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!("Namespace {} created successfully", self.name);
                Ok(())
            }
            // Created concurrently by another run
            Err(e) if is_conflict(&e) => {
                debug!("Namespace {} already exists", self.name);
                Ok(())
            }
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
