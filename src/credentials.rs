// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Deterministic naming of per-service database objects and generation of credentials.

use crate::constants::credentials::{MIN_PASSWORD_LEN, MIN_SIGNING_SECRET_LEN, ROLE_SUFFIXES};
use crate::error::{Result, ShipyardError};
use crate::redact::mask_secret;
use rand::{distr::Alphanumeric, rng, Rng};
use serde::Serialize;
use std::fmt;

/// Maximum identifier length accepted by PostgreSQL
const MAX_SQL_IDENTIFIER_LEN: usize = 63;
/// Maximum length of a DNS-1123 subdomain
const MAX_DNS_SUBDOMAIN_LEN: usize = 253;

/// Names derived from a service identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedNames {
    pub database_name: String,
    pub database_user: String,
    pub secret_name: String,
}

/// Explicit names that take precedence over derived ones
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameOverrides {
    pub database_name: Option<String>,
    pub database_user: Option<String>,
    pub secret_name: Option<String>,
}

/// Derive `{database_name, database_user, secret_name}` from a service name.
///
/// `game-stats-api` becomes `game_stats`, `game_stats_user`, `game-stats-api-secrets`.
pub fn derive(service_name: &str) -> Result<DerivedNames> {
    let service_name = service_name.trim();
    if service_name.is_empty() {
        return Err(ShipyardError::InvalidServiceName(
            "service name is empty".to_string(),
        ));
    }

    let base = ROLE_SUFFIXES
        .iter()
        .find_map(|suffix| {
            service_name
                .strip_suffix(suffix)
                .filter(|rest| !rest.is_empty())
        })
        .unwrap_or(service_name);

    let database_name = to_identifier(base);
    if database_name.is_empty() {
        return Err(ShipyardError::InvalidServiceName(format!(
            "'{}' does not contain any alphanumeric characters",
            service_name
        )));
    }

    let names = DerivedNames {
        database_user: format!("{}_user", database_name),
        database_name,
        secret_name: format!("{}-secrets", service_name),
    };
    names.validate(service_name)?;
    Ok(names)
}

/// Lower-case and collapse every run of separators into a single underscore
fn to_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

impl DerivedNames {
    /// Apply explicit overrides; explicit values always win.
    pub fn with_overrides(self, overrides: &NameOverrides) -> Result<Self> {
        let names = DerivedNames {
            database_name: overrides
                .database_name
                .clone()
                .unwrap_or(self.database_name),
            database_user: overrides
                .database_user
                .clone()
                .unwrap_or(self.database_user),
            secret_name: overrides.secret_name.clone().unwrap_or(self.secret_name),
        };
        names.validate("explicit override")?;
        Ok(names)
    }

    fn validate(&self, origin: &str) -> Result<()> {
        for (field, value) in [
            ("database name", &self.database_name),
            ("database user", &self.database_user),
        ] {
            if !is_sql_identifier(value) {
                return Err(ShipyardError::InvalidServiceName(format!(
                    "{} '{}' from {} is not a valid SQL identifier",
                    field, value, origin
                )));
            }
        }
        if !is_dns_subdomain(&self.secret_name) {
            return Err(ShipyardError::InvalidServiceName(format!(
                "secret name '{}' from {} is not a valid DNS-1123 subdomain",
                self.secret_name, origin
            )));
        }
        Ok(())
    }
}

/// `[a-z_][a-z0-9_]*`, at most 63 characters
pub fn is_sql_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    value.len() <= MAX_SQL_IDENTIFIER_LEN
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Lower-case alphanumerics, `-` and `.`, starting and ending alphanumeric
pub fn is_dns_subdomain(value: &str) -> bool {
    let is_edge = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    !value.is_empty()
        && value.len() <= MAX_DNS_SUBDOMAIN_LEN
        && value.starts_with(is_edge)
        && value.ends_with(is_edge)
        && value
            .chars()
            .all(|c| is_edge(c) || c == '-' || c == '.')
}

/// What a generated value is used for; decides its minimum length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Password,
    SigningSecret,
}

impl CredentialKind {
    pub fn min_len(self) -> usize {
        match self {
            CredentialKind::Password => MIN_PASSWORD_LEN,
            CredentialKind::SigningSecret => MIN_SIGNING_SECRET_LEN,
        }
    }
}

/// Where a credential is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    ClusterSecret,
    RepositorySecret,
}

/// Where a credential value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Supplied through configuration
    Explicit,
    /// Read back from the secret written by a previous run
    Existing,
    Generated,
}

/// A credential value. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub key: String,
    value: String,
    pub scope: CredentialScope,
    pub source: CredentialSource,
}

impl Credential {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        scope: CredentialScope,
        source: CredentialSource,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            scope,
            source,
        }
    }

    /// Resolve a credential: explicit value, then the existing one, then a fresh one.
    ///
    /// `rotate` discards the existing value but never an explicit one.
    pub fn resolve(
        key: impl Into<String>,
        kind: CredentialKind,
        scope: CredentialScope,
        explicit: Option<String>,
        existing: Option<String>,
        rotate: bool,
    ) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        if let Some(value) = non_empty(explicit) {
            return Self::new(key, value, scope, CredentialSource::Explicit);
        }
        if !rotate {
            if let Some(value) = non_empty(existing) {
                return Self::new(key, value, scope, CredentialSource::Existing);
            }
        }
        Self::new(key, generate(kind, kind.min_len()), scope, CredentialSource::Generated)
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &self.key)
            .field("value", &mask_secret(&self.value))
            .field("scope", &self.scope)
            .field("source", &self.source)
            .finish()
    }
}

/// Generate an alphanumeric value of at least the kind's minimum length.
///
/// The alphabet needs no escaping in shells, SQL literals or connection URIs.
pub fn generate(kind: CredentialKind, len: usize) -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(len.max(kind.min_len()))
        .map(char::from)
        .collect()
}

pub fn generate_password() -> String {
    generate(CredentialKind::Password, MIN_PASSWORD_LEN)
}

pub fn generate_signing_secret() -> String {
    generate(CredentialKind::SigningSecret, MIN_SIGNING_SECRET_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_strips_role_suffix() {
        let names = derive("game-stats-api").unwrap();
        assert_eq!(
            names,
            DerivedNames {
                database_name: "game_stats".to_string(),
                database_user: "game_stats_user".to_string(),
                secret_name: "game-stats-api-secrets".to_string(),
            }
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        for name in ["game-stats-api", "player-ui", "matchmaker", "chat.backend"] {
            assert_eq!(derive(name).unwrap(), derive(name).unwrap());
        }
    }

    #[test]
    fn test_derive_without_suffix() {
        let names = derive("matchmaker").unwrap();
        assert_eq!(names.database_name, "matchmaker");
        assert_eq!(names.database_user, "matchmaker_user");
        assert_eq!(names.secret_name, "matchmaker-secrets");
    }

    #[test]
    fn test_derive_strips_only_one_suffix() {
        let names = derive("auth-service-api").unwrap();
        assert_eq!(names.database_name, "auth_service");
    }

    #[test]
    fn test_derive_keeps_name_that_is_only_a_suffix() {
        let names = derive("api").unwrap();
        assert_eq!(names.database_name, "api");
    }

    #[test]
    fn test_derive_collapses_separators() {
        let names = derive("chat--history.v2-backend").unwrap();
        assert_eq!(names.database_name, "chat_history_v2");
        assert_eq!(names.secret_name, "chat--history.v2-backend-secrets");
    }

    #[test]
    fn test_derive_rejects_empty() {
        assert!(matches!(
            derive("  "),
            Err(ShipyardError::InvalidServiceName(_))
        ));
        assert!(matches!(
            derive("---"),
            Err(ShipyardError::InvalidServiceName(_))
        ));
    }

    #[test]
    fn test_derive_rejects_leading_digit_identifier() {
        assert!(matches!(
            derive("3d-render-api"),
            Err(ShipyardError::InvalidServiceName(_))
        ));
    }

    #[test]
    fn test_derive_rejects_uppercase_secret_name() {
        assert!(matches!(
            derive("Game-Stats-api"),
            Err(ShipyardError::InvalidServiceName(_))
        ));
    }

    #[test]
    fn test_overrides_win_over_derived_names() {
        let overrides = NameOverrides {
            database_name: Some("stats".to_string()),
            database_user: None,
            secret_name: Some("stats-credentials".to_string()),
        };

        let names = derive("game-stats-api")
            .unwrap()
            .with_overrides(&overrides)
            .unwrap();

        assert_eq!(names.database_name, "stats");
        assert_eq!(names.database_user, "game_stats_user");
        assert_eq!(names.secret_name, "stats-credentials");
    }

    #[test]
    fn test_overrides_are_validated() {
        let overrides = NameOverrides {
            database_user: Some("robert'); DROP TABLE students;--".to_string()),
            ..Default::default()
        };

        assert!(derive("game-stats-api")
            .unwrap()
            .with_overrides(&overrides)
            .is_err());
    }

    #[test]
    fn test_generate_enforces_minimum_length() {
        assert_eq!(generate(CredentialKind::Password, 8).len(), 32);
        assert_eq!(generate(CredentialKind::Password, 40).len(), 40);
        assert_eq!(generate_signing_secret().len(), 64);
    }

    #[test]
    fn test_generate_is_alphanumeric_and_unique() {
        let a = generate_password();
        let b = generate_password();
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolve_prefers_explicit_then_existing() {
        let cred = Credential::resolve(
            "DATABASE_PASSWORD",
            CredentialKind::Password,
            CredentialScope::ClusterSecret,
            Some("explicit".to_string()),
            Some("existing".to_string()),
            true,
        );
        assert_eq!(cred.value(), "explicit");
        assert_eq!(cred.source, CredentialSource::Explicit);

        let cred = Credential::resolve(
            "DATABASE_PASSWORD",
            CredentialKind::Password,
            CredentialScope::ClusterSecret,
            Some("   ".to_string()),
            Some("existing".to_string()),
            false,
        );
        assert_eq!(cred.value(), "existing");
        assert_eq!(cred.source, CredentialSource::Existing);
    }

    #[test]
    fn test_resolve_rotation_discards_existing() {
        let cred = Credential::resolve(
            "DATABASE_PASSWORD",
            CredentialKind::Password,
            CredentialScope::ClusterSecret,
            None,
            Some("existing".to_string()),
            true,
        );
        assert_eq!(cred.source, CredentialSource::Generated);
        assert_ne!(cred.value(), "existing");
        assert_eq!(cred.value().len(), 32);
    }

    #[test]
    fn test_credential_debug_is_masked() {
        let cred = Credential::new(
            "JWT_SECRET",
            "s3cr3tvalue-that-must-not-leak",
            CredentialScope::ClusterSecret,
            CredentialSource::Explicit,
        );
        let shown = format!("{:?}", cred);
        assert!(!shown.contains("s3cr3t"));
        assert!(shown.contains("****** (30 chars)"));
    }
}
