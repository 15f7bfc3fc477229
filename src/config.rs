// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Configuration loaded once from environment variables.
//!
//! `from_env` reads the process environment; `from_lookup` takes any lookup
//! function so tests never touch global state.

use crate::constants::{github, polling};
use crate::credentials::{self, DerivedNames, NameOverrides};
use crate::error::{Result, ShipyardError};
use crate::guard::{ActionPlan, ResourceAction};
use crate::propagate::RepoRef;
use crate::resources::bootstrap::BootstrapSource;
use crate::resources::ResourceKind;
use crate::wait::RetryPolicy;
use std::fmt;
use std::time::Duration;
use tracing::warn;
use url::Url;

const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Whether a human is watching: decides if unresolved secrets fail the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    Automated,
    Interactive,
}

impl ExecutionContext {
    /// Any `CI` or `GITHUB_ACTIONS` value other than `false`/`0` means automated
    fn detect(env: &Env<'_>) -> Self {
        let set = |key: &str| {
            env.get(key)
                .is_some_and(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0"))
        };
        if set("CI") || set("GITHUB_ACTIONS") {
            ExecutionContext::Automated
        } else {
            ExecutionContext::Interactive
        }
    }
}

/// Thin typed accessor over a variable lookup
struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Trimmed, non-empty value
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn first_of(&self, keys: &[&str], default: &str) -> String {
        keys.iter()
            .find_map(|k| self.get(k))
            .unwrap_or_else(|| default.to_string())
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        self.get(key)
            .map(|v| parse_bool(key, &v))
            .unwrap_or(Ok(default))
    }

    fn number(&self, key: &str, default: u64) -> Result<u64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| {
                ShipyardError::ConfigError(format!("{} must be a whole number, got '{}'", key, v))
            }),
        }
    }

    fn positive(&self, key: &str, default: u64) -> Result<u64> {
        let value = self.number(key, default)?;
        if value == 0 {
            return Err(ShipyardError::ConfigError(format!("{} must be at least 1", key)));
        }
        Ok(value)
    }

    fn secs(&self, key: &str, default: u64) -> Result<Duration> {
        Ok(Duration::from_secs(self.positive(key, default)?))
    }

    fn url(&self, key: &str, default: &str) -> Result<Url> {
        let raw = self.get_or(key, default);
        Url::parse(&raw)
            .map_err(|e| ShipyardError::ConfigError(format!("{} '{}' is not a URL: {}", key, raw, e)))
    }
}

/// Strict boolean: `true`/`false`/`1`/`0`, case-insensitive
pub fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(ShipyardError::ConfigError(format!(
            "{} must be true or false, got '{}'",
            key, other
        ))),
    }
}

/// Environment variable prefix for a service: `game-stats-api` -> `GAME_STATS_API`
pub fn service_env_prefix(service: &str) -> String {
    service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// One service that gets a database role, database and connection secret
#[derive(Clone)]
pub struct ServiceConfig {
    pub service: String,
    pub names: DerivedNames,
    pub password: Option<String>,
    pub jwt_secret: Option<String>,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("service", &self.service)
            .field("names", &self.names)
            .field("password", &self.password.as_ref().map(|_| "<explicit>"))
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<explicit>"))
            .finish()
    }
}

impl ServiceConfig {
    fn from_env(env: &Env<'_>, service: &str) -> Result<Self> {
        let prefix = service_env_prefix(service);
        let var = |suffix: &str| env.get(&format!("{}_{}", prefix, suffix));

        let names = credentials::derive(service)?.with_overrides(&NameOverrides {
            database_name: var("DB_NAME"),
            database_user: var("DB_USER"),
            secret_name: var("SECRET_NAME"),
        })?;

        Ok(Self {
            service: service.to_string(),
            names,
            password: var("DB_PASSWORD"),
            jwt_secret: var("JWT_SECRET"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub apps_namespace: String,
    pub database_namespace: String,
    pub ingress_namespace: String,
    pub cert_manager_namespace: String,
    pub gitops_namespace: String,
    pub storage_class: String,
    pub storage_provisioner: String,
    pub db_storage_size: String,
    pub cache_storage_size: String,
    pub ingress_replicas: u32,
    pub gitops_replicas: u32,
    pub acme_email: String,
    pub acme_server: Url,
    pub cluster_issuer: String,
    pub services: Vec<ServiceConfig>,
    pub bootstrap: Option<BootstrapSource>,
    pub actions: ActionPlan,
    pub rotate_credentials: bool,
    pub ready_timeout: Duration,
    pub ready_poll: Duration,
}

impl ProvisionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup };

        let acme_email = env.get("ACME_EMAIL").ok_or_else(|| {
            ShipyardError::ConfigError(
                "ACME_EMAIL must be set for the certificate issuer".to_string(),
            )
        })?;

        let services = env
            .get("SERVICES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|service| ServiceConfig::from_env(&env, service))
            .collect::<Result<Vec<_>>>()?;

        let bootstrap = env.get("BOOTSTRAP_REPO_URL").map(|repo_url| BootstrapSource {
            repo_url,
            path: env.get_or("BOOTSTRAP_PATH", "apps"),
            revision: env.get_or("BOOTSTRAP_REVISION", "HEAD"),
        });

        Ok(Self {
            apps_namespace: env.first_of(&["APPS_NAMESPACE", "TARGET_NAMESPACE"], "apps"),
            database_namespace: env.get_or("DATABASE_NAMESPACE", "databases"),
            ingress_namespace: env.get_or("INGRESS_NAMESPACE", "ingress-nginx"),
            cert_manager_namespace: env.get_or("CERT_MANAGER_NAMESPACE", "cert-manager"),
            gitops_namespace: env.get_or("GITOPS_NAMESPACE", "argocd"),
            storage_class: env.get_or("STORAGE_CLASS", "shipyard-local"),
            storage_provisioner: env.get_or("STORAGE_PROVISIONER", "rancher.io/local-path"),
            db_storage_size: env.get_or("DB_STORAGE_SIZE", "10Gi"),
            cache_storage_size: env.get_or("CACHE_STORAGE_SIZE", "2Gi"),
            ingress_replicas: replicas(&env, "INGRESS_REPLICAS")?,
            gitops_replicas: replicas(&env, "GITOPS_REPLICAS")?,
            acme_email,
            acme_server: env.url("ACME_SERVER", LETSENCRYPT_PRODUCTION)?,
            cluster_issuer: env.get_or("CLUSTER_ISSUER", "letsencrypt"),
            services,
            bootstrap,
            actions: action_plan(&env)?,
            rotate_credentials: env.flag("ROTATE_CREDENTIALS", false)?,
            ready_timeout: env.secs("READY_TIMEOUT_SECS", polling::READY_TIMEOUT_SECS)?,
            ready_poll: env.secs("READY_POLL_SECS", polling::READY_POLL_SECS)?,
        })
    }

    pub fn ready_policy(&self) -> RetryPolicy {
        RetryPolicy::within(self.ready_timeout, self.ready_poll)
    }

    /// Switch to recreate mode, as `--cleanup` does
    pub fn enable_cleanup(&mut self) {
        self.actions = cleanup_plan(self.actions.allow_data_loss);
    }
}

fn replicas(env: &Env<'_>, key: &str) -> Result<u32> {
    let value = env.positive(key, 1)?;
    u32::try_from(value)
        .map_err(|_| ShipyardError::ConfigError(format!("{} is out of range: {}", key, value)))
}

/// Namespaces and the storage class are never recreated; they hold everything else
fn cleanup_plan(allow_data_loss: bool) -> ActionPlan {
    ActionPlan::new(ResourceAction::Recreate, allow_data_loss)
        .with_action(ResourceKind::Namespace, ResourceAction::Reuse)
        .with_action(ResourceKind::StorageClass, ResourceAction::Reuse)
}

fn action_plan(env: &Env<'_>) -> Result<ActionPlan> {
    let allow_data_loss = env.flag("ALLOW_DATA_LOSS", false)?;
    let cleanup = env.flag("CLEANUP_MODE", false)?;

    let action = match env.get("EXISTING_RESOURCES") {
        Some(raw) => {
            let action: ResourceAction = raw.parse()?;
            if cleanup && action != ResourceAction::Recreate {
                warn!(
                    "CLEANUP_MODE=true ignored because EXISTING_RESOURCES={} is set",
                    raw
                );
            }
            action
        }
        None if cleanup => ResourceAction::Recreate,
        None => ResourceAction::Reuse,
    };

    Ok(match action {
        ResourceAction::Recreate => cleanup_plan(allow_data_loss),
        other => ActionPlan::new(other, allow_data_loss),
    })
}

#[derive(Clone)]
pub struct PropagationConfig {
    pub source: RepoRef,
    pub token: Option<String>,
    pub api_url: Url,
    pub timeout: Duration,
    pub poll: Duration,
    pub context: ExecutionContext,
}

impl fmt::Debug for PropagationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagationConfig")
            .field("source", &self.source)
            .field("token", &self.token.as_ref().map(|_| "<set>"))
            .field("api_url", &self.api_url.as_str())
            .field("timeout", &self.timeout)
            .field("poll", &self.poll)
            .field("context", &self.context)
            .finish()
    }
}

impl PropagationConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup };

        let source = env
            .get("SECRETS_SOURCE_REPO")
            .ok_or_else(|| {
                ShipyardError::ConfigError(
                    "SECRETS_SOURCE_REPO must name the repository holding the secrets (owner/name)"
                        .to_string(),
                )
            })?
            .parse()?;

        Ok(Self {
            source,
            token: github::TOKEN_VARIABLES.iter().find_map(|k| env.get(k)),
            api_url: env.url("GITHUB_API_URL", github::DEFAULT_API_URL)?,
            timeout: env.secs("PROPAGATION_TIMEOUT_SECS", polling::PROPAGATION_TIMEOUT_SECS)?,
            poll: env.secs("PROPAGATION_POLL_SECS", polling::PROPAGATION_POLL_SECS)?,
            context: ExecutionContext::detect(&env),
        })
    }

    pub fn poll_policy(&self) -> RetryPolicy {
        RetryPolicy::within(self.timeout, self.poll)
    }

    /// The first configured token, or a credential error naming the variables
    pub fn require_token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| {
            ShipyardError::MissingCredential(format!(
                "no GitHub token found; set one of {}",
                github::TOKEN_VARIABLES.join(", ")
            ))
        })
    }
}
