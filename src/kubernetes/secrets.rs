// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reading and upserting opaque cluster secrets

use crate::constants::{labels, FIELD_MANAGER};
use crate::error::{Result, ShipyardError};
use crate::kubernetes::workloads::get_opt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{
    api::{ObjectMeta, Patch, PatchParams},
    Api, Client,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Read one key of a secret; `None` if the secret or the key is missing
#[instrument(skip(client))]
pub async fn read_secret_value(
    client: &Client,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<Option<String>> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let Some(secret) = get_opt(&secrets, name).await? else {
        debug!("Secret {}/{} does not exist", namespace, name);
        return Ok(None);
    };

    let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) else {
        return Ok(None);
    };

    String::from_utf8(value.0.clone()).map(Some).map_err(|e| {
        ShipyardError::SerializationError(format!(
            "key '{}' of secret {}/{} is not UTF-8: {}",
            key, namespace, name, e
        ))
    })
}

/// Build an opaque secret labelled as managed by Shipyard
pub fn build_secret(
    namespace: &str,
    name: &str,
    extra_labels: BTreeMap<String, String>,
    data: BTreeMap<String, String>,
) -> Secret {
    let mut secret_labels = BTreeMap::from([(
        labels::MANAGED_BY.to_string(),
        FIELD_MANAGER.to_string(),
    )]);
    secret_labels.extend(extra_labels);

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(secret_labels),
            ..Default::default()
        },
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Create or update a secret with server-side apply
#[instrument(skip(client, secret), fields(secret = %secret.metadata.name.clone().unwrap_or_default()))]
pub async fn apply_secret(client: &Client, secret: &Secret) -> Result<()> {
    let namespace = secret.metadata.namespace.clone().unwrap_or_default();
    let name = secret.metadata.name.clone().unwrap_or_default();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);

    let pp = PatchParams::apply(FIELD_MANAGER).force();
    secrets.patch(&name, &pp, &Patch::Apply(secret)).await?;

    debug!("Applied secret {}/{}", namespace, name);
    Ok(())
}
