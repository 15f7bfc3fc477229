// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Connection secret consumed by a service's workloads.

use super::{is_not_found, ManagedResource, ResourceKind};
use crate::constants::{labels, secret_keys};
use crate::credentials::{Credential, CredentialKind, CredentialScope};
use crate::error::{Result, ShipyardError};
use crate::kubernetes::secrets::{apply_secret, build_secret, read_secret_value};
use crate::kubernetes::workloads::get_opt;
use crate::redact::Masked;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::DeleteParams, Api, Client};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};
use url::Url;

/// Every key a service secret carries
const SECRET_KEYS: [&str; 8] = [
    secret_keys::DATABASE_URL,
    secret_keys::DATABASE_HOST,
    secret_keys::DATABASE_PORT,
    secret_keys::DATABASE_NAME,
    secret_keys::DATABASE_USER,
    secret_keys::DATABASE_PASSWORD,
    secret_keys::REDIS_URL,
    secret_keys::JWT_SECRET,
];

/// `base` with user info added; the password is percent-encoded
fn connection_url(base: &str, user: &str, password: Option<&str>) -> Result<String> {
    let invalid =
        || ShipyardError::SerializationError(format!("cannot add credentials to {}", base));
    let mut url = Url::parse(base).map_err(|e| {
        ShipyardError::SerializationError(format!("invalid connection URL {}: {}", base, e))
    })?;
    if let Some(password) = password {
        url.set_username(user).map_err(|_| invalid())?;
        url.set_password(Some(password)).map_err(|_| invalid())?;
    }
    Ok(url.to_string())
}

/// Where a password lives in the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

/// In-cluster addresses of the shared database and cache servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub database_host: String,
    pub database_port: u16,
    pub redis_host: String,
    pub redis_port: u16,
    /// Admin password of the cache server, read when the secret is written
    pub redis_auth: SecretRef,
}

/// Credentials shared between a service's database role and its secret
#[derive(Debug, Clone)]
pub struct ServiceCredentials {
    pub database_password: Credential,
    pub jwt_secret: Credential,
}

impl ServiceCredentials {
    /// Resolve both credentials against the values stored by a previous run
    #[instrument(skip(client, explicit_password, explicit_jwt_secret))]
    pub async fn resolve(
        client: &Client,
        namespace: &str,
        secret_name: &str,
        explicit_password: Option<String>,
        explicit_jwt_secret: Option<String>,
        rotate: bool,
    ) -> Result<Self> {
        let (existing_password, existing_jwt) = if rotate {
            (None, None)
        } else {
            (
                read_secret_value(client, namespace, secret_name, secret_keys::DATABASE_PASSWORD)
                    .await?,
                read_secret_value(client, namespace, secret_name, secret_keys::JWT_SECRET).await?,
            )
        };

        let credentials = Self {
            database_password: Credential::resolve(
                secret_keys::DATABASE_PASSWORD,
                CredentialKind::Password,
                CredentialScope::ClusterSecret,
                explicit_password,
                existing_password,
                rotate,
            ),
            jwt_secret: Credential::resolve(
                secret_keys::JWT_SECRET,
                CredentialKind::SigningSecret,
                CredentialScope::ClusterSecret,
                explicit_jwt_secret,
                existing_jwt,
                rotate,
            ),
        };
        debug!(
            "Resolved credentials for {}: password {:?}, JWT secret {:?}",
            secret_name, credentials.database_password.source, credentials.jwt_secret.source
        );
        Ok(credentials)
    }
}

pub struct ServiceSecret {
    client: Client,
    namespace: String,
    name: String,
    service: String,
    database_name: String,
    database_user: String,
    credentials: ServiceCredentials,
    endpoints: ServiceEndpoints,
}

impl ServiceSecret {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        name: impl Into<String>,
        service: impl Into<String>,
        database_name: impl Into<String>,
        database_user: impl Into<String>,
        credentials: ServiceCredentials,
        endpoints: ServiceEndpoints,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
            service: service.into(),
            database_name: database_name.into(),
            database_user: database_user.into(),
            credentials,
            endpoints,
        }
    }

    fn api(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Secret contents; `redis_password` is `None` when the cache server has no auth secret
    pub(crate) fn data(&self, redis_password: Option<&str>) -> Result<BTreeMap<String, String>> {
        let password = self.credentials.database_password.value();
        let endpoints = &self.endpoints;
        let database_url = connection_url(
            &format!(
                "postgres://{}:{}/{}",
                endpoints.database_host, endpoints.database_port, self.database_name
            ),
            &self.database_user,
            Some(password),
        )?;
        let redis_url = connection_url(
            &format!("redis://{}:{}", endpoints.redis_host, endpoints.redis_port),
            "",
            redis_password,
        )?;

        Ok(BTreeMap::from([
            (secret_keys::DATABASE_URL.to_string(), database_url),
            (
                secret_keys::DATABASE_HOST.to_string(),
                endpoints.database_host.clone(),
            ),
            (
                secret_keys::DATABASE_PORT.to_string(),
                endpoints.database_port.to_string(),
            ),
            (
                secret_keys::DATABASE_NAME.to_string(),
                self.database_name.clone(),
            ),
            (
                secret_keys::DATABASE_USER.to_string(),
                self.database_user.clone(),
            ),
            (secret_keys::DATABASE_PASSWORD.to_string(), password.to_string()),
            (secret_keys::REDIS_URL.to_string(), redis_url),
            (
                secret_keys::JWT_SECRET.to_string(),
                self.credentials.jwt_secret.value().to_string(),
            ),
        ]))
    }

    #[instrument(skip(self), fields(secret = %self.name))]
    async fn apply(&self) -> Result<()> {
        let auth = &self.endpoints.redis_auth;
        let redis_password =
            read_secret_value(&self.client, &auth.namespace, &auth.name, &auth.key).await?;

        info!(
            "Writing {}/{} (database password {}, JWT secret {})",
            self.namespace,
            self.name,
            Masked(self.credentials.database_password.value()),
            Masked(self.credentials.jwt_secret.value())
        );
        let secret = build_secret(
            &self.namespace,
            &self.name,
            BTreeMap::from([(labels::SERVICE.to_string(), self.service.clone())]),
            self.data(redis_password.as_deref())?,
        );
        apply_secret(&self.client, &secret).await
    }
}

#[async_trait]
impl ManagedResource for ServiceSecret {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ServiceSecret
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool> {
        Ok(get_opt(&self.api(), &self.name).await?.is_some())
    }

    /// Ready when every key is present and the password matches the database role
    async fn is_ready(&self) -> Result<bool> {
        let Some(secret) = get_opt(&self.api(), &self.name).await? else {
            return Ok(false);
        };
        let data = secret.data.unwrap_or_default();
        let complete = SECRET_KEYS.iter().all(|key| data.contains_key(*key));
        let consistent = data
            .get(secret_keys::DATABASE_PASSWORD)
            .is_some_and(|v| v.0 == self.credentials.database_password.value().as_bytes());
        Ok(complete && consistent)
    }

    async fn create(&self) -> Result<()> {
        self.apply().await
    }

    async fn refresh(&self) -> Result<()> {
        self.apply().await
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
    use crate::credentials::CredentialSource;
    use crate::test_utils::{secret_json, MockService};

    const SECRET_PATH: &str = "/api/v1/namespaces/apps/secrets/game-stats-api-secrets";
    const REDIS_AUTH_PATH: &str = "/api/v1/namespaces/databases/secrets/redis-auth";

    fn credential(key: &str, value: &str) -> Credential {
        Credential::new(
            key,
            value,
            CredentialScope::ClusterSecret,
            CredentialSource::Generated,
        )
    }

    fn endpoints() -> ServiceEndpoints {
        ServiceEndpoints {
            database_host: "postgresql.databases.svc.cluster.local".to_string(),
            database_port: 5432,
            redis_host: "redis-master.databases.svc.cluster.local".to_string(),
            redis_port: 6379,
            redis_auth: SecretRef {
                namespace: "databases".to_string(),
                name: "redis-auth".to_string(),
                key: "redis-password".to_string(),
            },
        }
    }

    fn service_secret(mock: &MockService, password: &str) -> ServiceSecret {
        ServiceSecret::new(
            mock.client(),
            "apps",
            "game-stats-api-secrets",
            "game-stats-api",
            "game_stats",
            "game_stats_user",
            ServiceCredentials {
                database_password: credential(secret_keys::DATABASE_PASSWORD, password),
                jwt_secret: credential(secret_keys::JWT_SECRET, "jwt"),
            },
            endpoints(),
        )
    }

    #[tokio::test]
    async fn test_data_contains_connection_details() {
        let mock = MockService::new();
        let data = service_secret(&mock, "pw").data(Some("cachepw")).unwrap();

        assert_eq!(
            data[secret_keys::DATABASE_URL],
            "postgres://game_stats_user:pw@postgresql.databases.svc.cluster.local:5432/game_stats"
        );
        assert_eq!(data[secret_keys::DATABASE_PORT], "5432");
        assert_eq!(
            data[secret_keys::REDIS_URL],
            "redis://:cachepw@redis-master.databases.svc.cluster.local:6379"
        );
        assert_eq!(data.len(), SECRET_KEYS.len());
    }

    #[tokio::test]
    async fn test_explicit_password_is_escaped_in_urls() {
        let mock = MockService::new();
        let data = service_secret(&mock, "p@ss/w:rd#1")
            .data(Some("c@che:pw"))
            .unwrap();

        let url = Url::parse(&data[secret_keys::DATABASE_URL]).unwrap();
        assert_eq!(url.host_str(), Some("postgresql.databases.svc.cluster.local"));
        assert_eq!(url.port(), Some(5432));
        assert_eq!(url.path(), "/game_stats");
        assert_eq!(url.username(), "game_stats_user");
        assert_eq!(url.password(), Some("p%40ss%2Fw%3Ard%231"));
        assert_eq!(data[secret_keys::DATABASE_PASSWORD], "p@ss/w:rd#1");

        let redis = Url::parse(&data[secret_keys::REDIS_URL]).unwrap();
        assert_eq!(redis.host_str(), Some("redis-master.databases.svc.cluster.local"));
        assert_eq!(redis.password(), Some("c%40che%3Apw"));
    }

    #[tokio::test]
    async fn test_redis_url_without_password() {
        let mock = MockService::new();
        let data = service_secret(&mock, "pw").data(None).unwrap();
        assert_eq!(
            data[secret_keys::REDIS_URL],
            "redis://redis-master.databases.svc.cluster.local:6379"
        );
    }

    #[tokio::test]
    async fn test_create_applies_with_server_side_apply() {
        let mock = MockService::new()
            .on_get(
                REDIS_AUTH_PATH,
                200,
                &secret_json("databases", "redis-auth", &[("redis-password", "cachepw")]),
            )
            .on_patch(
                SECRET_PATH,
                200,
                &secret_json("apps", "game-stats-api-secrets", &[]),
            );

        service_secret(&mock, "pw").create().await.unwrap();

        assert_eq!(mock.count("PATCH"), 1);
    }

    #[tokio::test]
    async fn test_ready_requires_matching_password() {
        let keys = [
            "DATABASE_URL",
            "DATABASE_HOST",
            "DATABASE_PORT",
            "DATABASE_NAME",
            "DATABASE_USER",
            "REDIS_URL",
            "JWT_SECRET",
        ];
        let mut data: Vec<(&str, &str)> = keys.iter().map(|k| (*k, "x")).collect();
        data.push(("DATABASE_PASSWORD", "current"));
        let body = secret_json("apps", "game-stats-api-secrets", &data);
        let mock = MockService::new().on_get(SECRET_PATH, 200, &body);

        assert!(service_secret(&mock, "current").is_ready().await.unwrap());
        assert!(!service_secret(&mock, "rotated").is_ready().await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_reuses_stored_values() {
        let mock = MockService::new().on_get(
            SECRET_PATH,
            200,
            &secret_json(
                "apps",
                "game-stats-api-secrets",
                &[("DATABASE_PASSWORD", "stored-pw"), ("JWT_SECRET", "stored-jwt")],
            ),
        );

        let credentials = ServiceCredentials::resolve(
            &mock.client(),
            "apps",
            "game-stats-api-secrets",
            None,
            None,
            false,
        )
        .await
        .unwrap();

        assert_eq!(credentials.database_password.value(), "stored-pw");
        assert_eq!(credentials.database_password.source, CredentialSource::Existing);
        assert_eq!(credentials.jwt_secret.value(), "stored-jwt");
    }

    #[tokio::test]
    async fn test_resolve_rotation_skips_stored_values() {
        let mock = MockService::new();

        let credentials = ServiceCredentials::resolve(
            &mock.client(),
            "apps",
            "game-stats-api-secrets",
            Some("explicit-pw".to_string()),
            None,
            true,
        )
        .await
        .unwrap();

        assert_eq!(credentials.database_password.value(), "explicit-pw");
        assert_eq!(credentials.database_password.source, CredentialSource::Explicit);
        assert_eq!(credentials.jwt_secret.source, CredentialSource::Generated);
        assert_eq!(credentials.jwt_secret.value().len(), 64);
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_generates_when_secret_missing() {
        let mock = MockService::new();

        let credentials = ServiceCredentials::resolve(
            &mock.client(),
            "apps",
            "game-stats-api-secrets",
            None,
            None,
            false,
        )
        .await
        .unwrap();

        assert_eq!(credentials.database_password.source, CredentialSource::Generated);
        assert_eq!(credentials.database_password.value().len(), 32);
    }
}
