// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Turns configuration into the ordered list of provisioning steps.

use super::Step;
use crate::config::{ProvisionConfig, ServiceConfig};
use crate::constants::{polling, secret_keys};
use crate::credentials::CredentialSource;
use crate::error::Result;
use crate::helm::{ChartInstaller, ChartRelease};
use crate::resources::bootstrap::ApplicationBootstrap;
use crate::resources::issuer::AcmeSettings;
use crate::resources::service_secret::{SecretRef, ServiceCredentials, ServiceEndpoints};
use crate::resources::{
    CertificateIssuer, ChartResource, NamespaceResource, ResourceKind, ServiceDatabase,
    ServiceSecret, ServiceUser, SqlExecutor, StorageClassResource, Workload,
};
use crate::wait::RetryPolicy;
use kube::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const INGRESS_CLASS: &str = "nginx";
const POSTGRES_AUTH_SECRET: &str = "postgresql-auth";
const REDIS_AUTH_SECRET: &str = "redis-auth";
const POSTGRES_PORT: u16 = 5432;
const REDIS_PORT: u16 = 6379;
const ROOT_APPLICATION: &str = "root";

pub fn ingress_release(config: &ProvisionConfig) -> ChartRelease {
    ChartRelease {
        name: "ingress-nginx".to_string(),
        chart: "ingress-nginx".to_string(),
        repo_url: "https://kubernetes.github.io/ingress-nginx".to_string(),
        namespace: config.ingress_namespace.clone(),
        version: None,
        values: json!({
            "controller": {
                "replicaCount": config.ingress_replicas,
                "ingressClassResource": {"name": INGRESS_CLASS, "default": true}
            }
        }),
    }
}

pub fn cert_manager_release(config: &ProvisionConfig) -> ChartRelease {
    ChartRelease {
        name: "cert-manager".to_string(),
        chart: "cert-manager".to_string(),
        repo_url: "https://charts.jetstack.io".to_string(),
        namespace: config.cert_manager_namespace.clone(),
        version: None,
        values: json!({"crds": {"enabled": true}}),
    }
}

pub fn postgresql_release(config: &ProvisionConfig) -> ChartRelease {
    ChartRelease {
        name: "postgresql".to_string(),
        chart: "postgresql".to_string(),
        repo_url: "https://charts.bitnami.com/bitnami".to_string(),
        namespace: config.database_namespace.clone(),
        version: None,
        values: json!({
            "auth": {
                "existingSecret": POSTGRES_AUTH_SECRET,
                "secretKeys": {"adminPasswordKey": secret_keys::POSTGRES_ADMIN_PASSWORD}
            },
            "primary": {
                "persistence": {
                    "storageClass": config.storage_class,
                    "size": config.db_storage_size
                }
            }
        }),
    }
}

pub fn redis_release(config: &ProvisionConfig) -> ChartRelease {
    ChartRelease {
        name: "redis".to_string(),
        chart: "redis".to_string(),
        repo_url: "https://charts.bitnami.com/bitnami".to_string(),
        namespace: config.database_namespace.clone(),
        version: None,
        values: json!({
            "architecture": "standalone",
            "auth": {
                "enabled": true,
                "existingSecret": REDIS_AUTH_SECRET,
                "existingSecretPasswordKey": secret_keys::REDIS_PASSWORD
            },
            "master": {
                "persistence": {
                    "storageClass": config.storage_class,
                    "size": config.cache_storage_size
                }
            }
        }),
    }
}

pub fn argocd_release(config: &ProvisionConfig) -> ChartRelease {
    ChartRelease {
        name: "argocd".to_string(),
        chart: "argo-cd".to_string(),
        repo_url: "https://argoproj.github.io/argo-helm".to_string(),
        namespace: config.gitops_namespace.clone(),
        version: None,
        values: json!({"server": {"replicas": config.gitops_replicas}}),
    }
}

pub fn service_endpoints(config: &ProvisionConfig) -> ServiceEndpoints {
    let ns = &config.database_namespace;
    ServiceEndpoints {
        database_host: format!("postgresql.{}.svc.cluster.local", ns),
        database_port: POSTGRES_PORT,
        redis_host: format!("redis-master.{}.svc.cluster.local", ns),
        redis_port: REDIS_PORT,
        redis_auth: SecretRef {
            namespace: ns.clone(),
            name: REDIS_AUTH_SECRET.to_string(),
            key: secret_keys::REDIS_PASSWORD.to_string(),
        },
    }
}

/// Every namespace the plan writes into, without duplicates, in a stable order
fn namespaces(config: &ProvisionConfig) -> Vec<String> {
    let mut seen = Vec::new();
    for ns in [
        &config.apps_namespace,
        &config.database_namespace,
        &config.ingress_namespace,
        &config.cert_manager_namespace,
        &config.gitops_namespace,
    ] {
        if !seen.contains(ns) {
            seen.push(ns.clone());
        }
    }
    seen
}

fn crd_wait() -> RetryPolicy {
    RetryPolicy::within(
        Duration::from_secs(polling::CRD_TIMEOUT_SECS),
        Duration::from_secs(polling::CRD_POLL_INTERVAL_SECS),
    )
}

/// Build the ordered plan. Reads existing service secrets to resolve credentials.
pub async fn build_plan(
    config: &ProvisionConfig,
    client: &Client,
    installer: Arc<dyn ChartInstaller>,
    sql: Arc<dyn SqlExecutor>,
) -> Result<Vec<Step>> {
    let actions = &config.actions;
    let action = |kind| actions.action_for(kind);
    let mut steps = Vec::new();

    for ns in namespaces(config) {
        steps.push(Step::new(
            Box::new(NamespaceResource::new(client.clone(), ns)),
            action(ResourceKind::Namespace),
        ));
    }

    steps.push(Step::new(
        Box::new(StorageClassResource::new(
            client.clone(),
            &config.storage_class,
            &config.storage_provisioner,
        )),
        action(ResourceKind::StorageClass),
    ));

    steps.push(Step::new(
        Box::new(ChartResource::new(
            client.clone(),
            installer.clone(),
            ResourceKind::IngressController,
            ingress_release(config),
            Workload::Deployment("ingress-nginx-controller".to_string()),
        )),
        action(ResourceKind::IngressController),
    ));

    steps.push(Step::new(
        Box::new(CertificateIssuer::new(
            client.clone(),
            installer.clone(),
            &config.cluster_issuer,
            cert_manager_release(config),
            AcmeSettings {
                server: config.acme_server.to_string(),
                email: config.acme_email.clone(),
                ingress_class: INGRESS_CLASS.to_string(),
            },
            crd_wait(),
        )),
        action(ResourceKind::ClusterIssuer),
    ));

    steps.push(Step::new(
        Box::new(
            ChartResource::new(
                client.clone(),
                installer.clone(),
                ResourceKind::DatabaseServer,
                postgresql_release(config),
                Workload::StatefulSet("postgresql".to_string()),
            )
            .with_auth_secret(POSTGRES_AUTH_SECRET, secret_keys::POSTGRES_ADMIN_PASSWORD),
        ),
        action(ResourceKind::DatabaseServer),
    ));

    steps.push(Step::new(
        Box::new(
            ChartResource::new(
                client.clone(),
                installer.clone(),
                ResourceKind::CacheServer,
                redis_release(config),
                Workload::StatefulSet("redis-master".to_string()),
            )
            .with_auth_secret(REDIS_AUTH_SECRET, secret_keys::REDIS_PASSWORD),
        ),
        action(ResourceKind::CacheServer),
    ));

    for service in &config.services {
        steps.extend(service_steps(config, client, sql.clone(), service).await?);
    }

    steps.push(Step::new(
        Box::new(ChartResource::new(
            client.clone(),
            installer.clone(),
            ResourceKind::GitOpsController,
            argocd_release(config),
            Workload::Deployment("argocd-server".to_string()),
        )),
        action(ResourceKind::GitOpsController),
    ));

    match &config.bootstrap {
        Some(source) => steps.push(Step::new(
            Box::new(ApplicationBootstrap::new(
                client.clone(),
                &config.gitops_namespace,
                ROOT_APPLICATION,
                source.clone(),
                &config.apps_namespace,
                crd_wait(),
            )),
            action(ResourceKind::ApplicationBootstrap),
        )),
        None => info!("BOOTSTRAP_REPO_URL not set, no root application will be created"),
    }

    Ok(steps)
}

/// User, database and secret for one service, sharing one resolved password
async fn service_steps(
    config: &ProvisionConfig,
    client: &Client,
    sql: Arc<dyn SqlExecutor>,
    service: &ServiceConfig,
) -> Result<Vec<Step>> {
    let names = &service.names;
    let credentials = ServiceCredentials::resolve(
        client,
        &config.apps_namespace,
        &names.secret_name,
        service.password.clone(),
        service.jwt_secret.clone(),
        config.rotate_credentials,
    )
    .await?;

    let actions = &config.actions;
    // A password that is not the stored one has to reach the role as well
    let user_action =
        if credentials.database_password.source == CredentialSource::Existing {
            actions.action_for(ResourceKind::ServiceUser)
        } else {
            actions.refreshed(ResourceKind::ServiceUser)
        };

    Ok(vec![
        Step::new(
            Box::new(ServiceUser::new(
                sql.clone(),
                &names.database_user,
                credentials.database_password.clone(),
            )),
            user_action,
        )
        .for_service(&service.service),
        Step::new(
            Box::new(ServiceDatabase::new(
                sql,
                &names.database_name,
                &names.database_user,
            )),
            actions.refreshed(ResourceKind::ServiceDatabase),
        )
        .for_service(&service.service),
        Step::new(
            Box::new(ServiceSecret::new(
                client.clone(),
                &config.apps_namespace,
                &names.secret_name,
                &service.service,
                &names.database_name,
                &names.database_user,
                credentials,
                service_endpoints(config),
            )),
            actions.refreshed(ResourceKind::ServiceSecret),
        )
        .for_service(&service.service),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::ResourceAction;
    use crate::helm::tests::RecordingInstaller;
    use crate::resources::database::tests::FakeSql;
    use crate::test_utils::{secret_json, MockService};

    fn config(vars: &[(&str, &str)]) -> ProvisionConfig {
        let mut all = vec![("ACME_EMAIL", "ops@example.com")];
        all.extend_from_slice(vars);
        let vars: std::collections::HashMap<String, String> = all
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProvisionConfig::from_lookup(&|key: &str| vars.get(key).cloned()).unwrap()
    }

    async fn plan(mock: &MockService, config: &ProvisionConfig) -> Vec<Step> {
        build_plan(
            config,
            &mock.client(),
            Arc::new(RecordingInstaller::default()),
            Arc::new(FakeSql::default()),
        )
        .await
        .unwrap()
    }

    fn kinds(steps: &[Step]) -> Vec<ResourceKind> {
        steps.iter().map(|s| s.kind()).collect()
    }

    #[tokio::test]
    async fn test_plan_order() {
        let mock = MockService::new();
        let config = config(&[
            ("SERVICES", "game-stats-api"),
            ("BOOTSTRAP_REPO_URL", "https://github.com/acme/gitops.git"),
        ]);

        let steps = plan(&mock, &config).await;

        use ResourceKind::*;
        assert_eq!(
            kinds(&steps),
            vec![
                Namespace,
                Namespace,
                Namespace,
                Namespace,
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
            ]
        );
        assert_eq!(steps[10].service.as_deref(), Some("game-stats-api"));
        assert_eq!(steps[10].resource.name(), "game_stats_user");
        assert_eq!(steps[12].resource.name(), "game-stats-api-secrets");
    }

    #[tokio::test]
    async fn test_no_bootstrap_without_repository() {
        let mock = MockService::new();
        let steps = plan(&mock, &config(&[])).await;
        assert_eq!(kinds(&steps).last(), Some(&ResourceKind::GitOpsController));
    }

    #[tokio::test]
    async fn test_shared_namespaces_are_deduplicated() {
        let mock = MockService::new();
        let config = config(&[("DATABASE_NAMESPACE", "apps"), ("GITOPS_NAMESPACE", "apps")]);
        let steps = plan(&mock, &config).await;

        let namespaces = kinds(&steps)
            .into_iter()
            .filter(|k| *k == ResourceKind::Namespace)
            .count();
        assert_eq!(namespaces, 3);
    }

    #[tokio::test]
    async fn test_new_password_refreshes_role() {
        let mock = MockService::new();
        let steps = plan(&mock, &config(&[("SERVICES", "game-stats-api")])).await;

        assert_eq!(steps[10].action, ResourceAction::Refresh);
        assert_eq!(steps[12].action, ResourceAction::Refresh);
    }

    #[tokio::test]
    async fn test_stored_password_reuses_role() {
        let mock = MockService::new().on_get(
            "/api/v1/namespaces/apps/secrets/game-stats-api-secrets",
            200,
            &secret_json(
                "apps",
                "game-stats-api-secrets",
                &[("DATABASE_PASSWORD", "stored"), ("JWT_SECRET", "stored-jwt")],
            ),
        );
        let steps = plan(&mock, &config(&[("SERVICES", "game-stats-api")])).await;

        assert_eq!(steps[10].action, ResourceAction::Reuse);

        let steps = plan(
            &mock,
            &config(&[("SERVICES", "game-stats-api"), ("ROTATE_CREDENTIALS", "true")]),
        )
        .await;
        assert_eq!(steps[10].action, ResourceAction::Refresh);
    }

    #[tokio::test]
    async fn test_cleanup_mode_keeps_namespaces() {
        let mock = MockService::new();
        let steps = plan(&mock, &config(&[("CLEANUP_MODE", "true")])).await;

        assert_eq!(steps[0].action, ResourceAction::Reuse);
        assert_eq!(steps[8].action, ResourceAction::Recreate);
    }

    #[test]
    fn test_database_chart_uses_existing_secret() {
        let config = config(&[]);
        let release = postgresql_release(&config);

        assert_eq!(release.values["auth"]["existingSecret"], "postgresql-auth");
        assert_eq!(
            release.values["primary"]["persistence"]["storageClass"],
            "shipyard-local"
        );
        assert!(!release.values_yaml().unwrap().contains("password:"));
    }

    #[test]
    fn test_service_endpoints() {
        let endpoints = service_endpoints(&config(&[]));
        assert_eq!(endpoints.database_host, "postgresql.databases.svc.cluster.local");
        assert_eq!(endpoints.redis_auth.name, "redis-auth");
    }
}
