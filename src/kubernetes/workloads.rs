// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Existence and readiness probes for Deployments and StatefulSets.

use crate::error::Result;
use crate::resources::is_not_found;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::{Api, Client};

/// `Some(object)` if it exists, `None` on 404
pub async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A deployment is ready once every desired replica reports ready
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    desired > 0 && ready >= desired
}

/// A stateful set is ready once every desired replica reports ready
pub fn stateful_set_ready(sts: &StatefulSet) -> bool {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = sts
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    desired > 0 && ready >= desired
}

pub async fn deployment_exists(client: &Client, namespace: &str, name: &str) -> Result<bool> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    Ok(get_opt(&api, name).await?.is_some())
}

pub async fn is_deployment_ready(client: &Client, namespace: &str, name: &str) -> Result<bool> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    Ok(get_opt(&api, name)
        .await?
        .is_some_and(|d| deployment_ready(&d)))
}

pub async fn stateful_set_exists(client: &Client, namespace: &str, name: &str) -> Result<bool> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    Ok(get_opt(&api, name).await?.is_some())
}

pub async fn is_stateful_set_ready(client: &Client, namespace: &str, name: &str) -> Result<bool> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    Ok(get_opt(&api, name)
        .await?
        .is_some_and(|s| stateful_set_ready(&s)))
}
