// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "shipyard";

/// Kubernetes label keys written by Shipyard
pub mod labels {
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    pub const INSTANCE: &str = "app.kubernetes.io/instance";
    /// Service a generated secret belongs to
    pub const SERVICE: &str = "shipyard.dev/service";
}

/// Credential sizing, in characters of the alphanumeric alphabet
pub mod credentials {
    pub const MIN_PASSWORD_LEN: usize = 32;
    pub const MIN_SIGNING_SECRET_LEN: usize = 64;

    /// Trailing role tokens stripped before deriving a database name
    pub const ROLE_SUFFIXES: &[&str] = &[
        "-api",
        "-ui",
        "-service",
        "-backend",
        "-frontend",
        "-worker",
        "-web",
    ];
}

/// Keys of the per-service cluster secret
pub mod secret_keys {
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const DATABASE_HOST: &str = "DATABASE_HOST";
    pub const DATABASE_PORT: &str = "DATABASE_PORT";
    pub const DATABASE_NAME: &str = "DATABASE_NAME";
    pub const DATABASE_USER: &str = "DATABASE_USER";
    pub const DATABASE_PASSWORD: &str = "DATABASE_PASSWORD";
    pub const REDIS_URL: &str = "REDIS_URL";
    pub const JWT_SECRET: &str = "JWT_SECRET";

    /// Key holding the admin password in the postgres auth secret
    pub const POSTGRES_ADMIN_PASSWORD: &str = "postgres-password";
    /// Key holding the password in the redis auth secret
    pub const REDIS_PASSWORD: &str = "redis-password";
}

/// Polling defaults
pub mod polling {
    pub const READY_TIMEOUT_SECS: u64 = 300;
    pub const READY_POLL_SECS: u64 = 5;
    pub const PROPAGATION_TIMEOUT_SECS: u64 = 30;
    pub const PROPAGATION_POLL_SECS: u64 = 2;
    /// Initial interval when waiting for a CRD to be served
    pub const CRD_POLL_INTERVAL_SECS: u64 = 5;
    pub const CRD_TIMEOUT_SECS: u64 = 120;
}

/// Source control hosting defaults
pub mod github {
    pub const DEFAULT_API_URL: &str = "https://api.github.com";
    pub const API_VERSION: &str = "2022-11-28";
    /// `event_type` of the dispatch that asks the source repository to export a secret
    pub const EXPORT_EVENT_TYPE: &str = "export-secret";
    pub const PAGE_SIZE: usize = 100;
    /// Token variables in order of preference
    pub const TOKEN_VARIABLES: &[&str] = &["SECRETS_SYNC_TOKEN", "GH_TOKEN", "GITHUB_TOKEN"];
}
