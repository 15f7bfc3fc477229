// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::error::Result;
use kube::{discovery::Discovery, Client};
use tracing::debug;

/// A custom resource type identified by API group, version and kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrdRef {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
}

pub const CLUSTER_ISSUER_CRD: CrdRef = CrdRef {
    group: "cert-manager.io",
    version: "v1",
    kind: "ClusterIssuer",
};

pub const APPLICATION_CRD: CrdRef = CrdRef {
    group: "argoproj.io",
    version: "v1alpha1",
    kind: "Application",
};

/// Check if a CRD is served by the API server by attempting to discover it.
pub async fn crd_available(client: &Client, crd: CrdRef) -> Result<bool> {
    let discovery = Discovery::new(client.clone())
        .filter(&[crd.group])
        .run()
        .await?;

    for group in discovery.groups() {
        if group.name() == crd.group {
            for (ar, _) in group.recommended_resources() {
                if ar.kind == crd.kind && ar.version == crd.version {
                    debug!("CRD {}/{} {} is available", crd.group, crd.version, crd.kind);
                    return Ok(true);
                }
            }
        }
    }

    Ok(false)
}
