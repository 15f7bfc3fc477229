// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-service PostgreSQL roles and databases.
//!
//! Statements run through `psql` inside the database server pod. Every create has
//! `IF NOT EXISTS` semantics so concurrent or repeated runs converge.

use super::{ManagedResource, ResourceKind};
use crate::credentials::Credential;
use crate::error::{Result, ShipyardError};
use crate::redact::{mask_identifier, scrub, Masked};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{api::AttachParams, Api, Client};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument};

/// Dollar-quote tag for DO blocks
const DO_TAG: &str = "$shipyard$";

/// Executes a single SQL statement as the database administrator.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Returns stdout in tuples-only, unaligned form, trimmed
    async fn execute(&self, sql: &str) -> Result<String>;
}

/// Runs `psql` in the database server pod via the exec subresource
pub struct PodSqlExecutor {
    client: Client,
    namespace: String,
    pod: String,
    admin_user: String,
    /// Container environment variable holding the admin password
    password_env: String,
}

impl PodSqlExecutor {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        pod: impl Into<String>,
        admin_user: impl Into<String>,
        password_env: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            pod: pod.into(),
            admin_user: admin_user.into(),
            password_env: password_env.into(),
        }
    }

    /// `sh -c` running psql on stdin; statements must not travel in the exec URL
    pub(crate) fn command(&self) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "PGPASSWORD=\"${}\" psql -U \"$0\" -d postgres -v ON_ERROR_STOP=1 -qtA -f -",
                self.password_env
            ),
            self.admin_user.clone(),
        ]
    }
}

#[async_trait]
impl SqlExecutor for PodSqlExecutor {
    async fn execute(&self, sql: &str) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let ap = AttachParams::default()
            .stdin(true)
            .stdout(true)
            .stderr(true);

        let mut process = pods.exec(&self.pod, self.command(), &ap).await?;
        let status = process.take_status();

        if let Some(mut stdin) = process.stdin() {
            let written = async {
                stdin.write_all(sql.as_bytes()).await?;
                stdin.write_all(b";\n").await?;
                stdin.shutdown().await
            };
            written.await.map_err(|e| {
                ShipyardError::SqlExecError(format!("failed to send statement to psql: {}", e))
            })?;
            // Dropping the writer closes stdin in the pod
        }

        let mut out = String::new();
        let mut err = String::new();
        if let (Some(mut stdout), Some(mut stderr)) = (process.stdout(), process.stderr()) {
            let (o, e) = tokio::join!(
                stdout.read_to_string(&mut out),
                stderr.read_to_string(&mut err)
            );
            o.and(e).map_err(|e| {
                ShipyardError::SqlExecError(format!("failed to read psql output: {}", e))
            })?;
        }

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        process
            .join()
            .await
            .map_err(|e| ShipyardError::SqlExecError(format!("exec stream failed: {}", e)))?;

        let succeeded = status
            .as_ref()
            .and_then(|s| s.status.as_deref())
            .is_some_and(|s| s == "Success");
        if !succeeded {
            let message = status.and_then(|s| s.message).unwrap_or_default();
            return Err(ShipyardError::SqlExecError(format!(
                "psql in pod {}/{} failed: {} {}",
                self.namespace,
                self.pod,
                message,
                err.trim()
            )));
        }

        Ok(out.trim().to_string())
    }
}

/// Double-quote an identifier
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Single-quote a string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Run `sql` and strip `secret` from any error text
async fn execute_scrubbed(executor: &dyn SqlExecutor, sql: &str, secret: &str) -> Result<String> {
    executor.execute(sql).await.map_err(|e| match e {
        ShipyardError::SqlExecError(msg) => ShipyardError::SqlExecError(scrub(&msg, &[secret])),
        other => other,
    })
}

async fn returns_row(executor: &dyn SqlExecutor, sql: &str) -> Result<bool> {
    Ok(executor.execute(sql).await? == "1")
}

/// A login role owned by one service
pub struct ServiceUser {
    executor: Arc<dyn SqlExecutor>,
    user: String,
    password: Credential,
}

impl ServiceUser {
    pub fn new(executor: Arc<dyn SqlExecutor>, user: impl Into<String>, password: Credential) -> Self {
        Self {
            executor,
            user: user.into(),
            password,
        }
    }

    fn password_clause(&self) -> String {
        format!("LOGIN PASSWORD {}", quote_literal(self.password.value()))
    }
}

#[async_trait]
impl ManagedResource for ServiceUser {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ServiceUser
    }

    fn name(&self) -> &str {
        &self.user
    }

    async fn exists(&self) -> Result<bool> {
        returns_row(
            self.executor.as_ref(),
            &format!(
                "SELECT 1 FROM pg_roles WHERE rolname = {}",
                quote_literal(&self.user)
            ),
        )
        .await
    }

    async fn is_ready(&self) -> Result<bool> {
        returns_row(
            self.executor.as_ref(),
            &format!(
                "SELECT 1 FROM pg_roles WHERE rolname = {} AND rolcanlogin",
                quote_literal(&self.user)
            ),
        )
        .await
    }

    #[instrument(skip(self), fields(user = %mask_identifier(&self.user)))]
    async fn create(&self) -> Result<()> {
        info!(
            "Creating role with password {} ({:?})",
            Masked(self.password.value()),
            self.password.source
        );
        let sql = format!(
            "DO {tag} BEGIN IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = {name}) THEN \
             CREATE ROLE {ident} {password}; END IF; END {tag}",
            tag = DO_TAG,
            name = quote_literal(&self.user),
            ident = quote_ident(&self.user),
            password = self.password_clause(),
        );
        execute_scrubbed(self.executor.as_ref(), &sql, self.password.value()).await?;
        Ok(())
    }

    /// Set the role's password to the resolved credential
    #[instrument(skip(self), fields(user = %mask_identifier(&self.user)))]
    async fn refresh(&self) -> Result<()> {
        info!("Updating role password to {}", Masked(self.password.value()));
        let sql = format!(
            "ALTER ROLE {} WITH {}",
            quote_ident(&self.user),
            self.password_clause()
        );
        execute_scrubbed(self.executor.as_ref(), &sql, self.password.value()).await?;
        Ok(())
    }

    /// Hands owned objects to the administrator before dropping the role
    async fn delete(&self, _purge_storage: bool) -> Result<()> {
        let sql = format!(
            "DO {tag} BEGIN IF EXISTS (SELECT FROM pg_roles WHERE rolname = {name}) THEN \
             REASSIGN OWNED BY {ident} TO CURRENT_USER; DROP OWNED BY {ident}; DROP ROLE {ident}; \
             END IF; END {tag}",
            tag = DO_TAG,
            name = quote_literal(&self.user),
            ident = quote_ident(&self.user),
        );
        self.executor.execute(&sql).await?;
        debug!("Role {} dropped", mask_identifier(&self.user));
        Ok(())
    }
}

/// A database owned by a service's role
pub struct ServiceDatabase {
    executor: Arc<dyn SqlExecutor>,
    database: String,
    owner: String,
}

impl ServiceDatabase {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        database: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            database: database.into(),
            owner: owner.into(),
        }
    }
}

#[async_trait]
impl ManagedResource for ServiceDatabase {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ServiceDatabase
    }

    fn name(&self) -> &str {
        &self.database
    }

    async fn exists(&self) -> Result<bool> {
        returns_row(
            self.executor.as_ref(),
            &format!(
                "SELECT 1 FROM pg_database WHERE datname = {}",
                quote_literal(&self.database)
            ),
        )
        .await
    }

    /// Ready once the database exists and belongs to the service role
    async fn is_ready(&self) -> Result<bool> {
        returns_row(
            self.executor.as_ref(),
            &format!(
                "SELECT 1 FROM pg_database d JOIN pg_roles r ON d.datdba = r.oid \
                 WHERE d.datname = {} AND r.rolname = {}",
                quote_literal(&self.database),
                quote_literal(&self.owner)
            ),
        )
        .await
    }

    async fn create(&self) -> Result<()> {
        // CREATE DATABASE cannot run inside a DO block
        let sql = format!(
            "CREATE DATABASE {} OWNER {}",
            quote_ident(&self.database),
            quote_ident(&self.owner)
        );
        match self.executor.execute(&sql).await {
            Ok(_) => Ok(()),
            Err(ShipyardError::SqlExecError(msg)) if msg.contains("already exists") => {
                debug!("Database {} created concurrently", self.database);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh(&self) -> Result<()> {
        self.executor
            .execute(&format!(
                "ALTER DATABASE {} OWNER TO {}",
                quote_ident(&self.database),
                quote_ident(&self.owner)
            ))
            .await?;
        Ok(())
    }

    async fn delete(&self, _purge_storage: bool) -> Result<()> {
        self.executor
            .execute(&format!(
                "DROP DATABASE IF EXISTS {} WITH (FORCE)",
                quote_ident(&self.database)
            ))
            .await?;
        Ok(())
    }
}
