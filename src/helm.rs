// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Helm release installation through the `helm` binary.

use crate::error::{Result, ShipyardError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// A chart to install, with its value overrides
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRelease {
    pub name: String,
    pub chart: String,
    pub repo_url: String,
    pub namespace: String,
    pub version: Option<String>,
    /// Rendered to YAML and passed on stdin; never carries credential values
    pub values: serde_json::Value,
}

impl ChartRelease {
    /// Arguments for `helm upgrade --install`; values are read from stdin (`-f -`)
    pub fn install_args(&self) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            self.name.clone(),
            self.chart.clone(),
            "--repo".to_string(),
            self.repo_url.clone(),
            "--namespace".to_string(),
            self.namespace.clone(),
            "--create-namespace".to_string(),
        ];
        if let Some(version) = &self.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        args.push("-f".to_string());
        args.push("-".to_string());
        args
    }

    pub fn values_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.values).map_err(|e| {
            ShipyardError::SerializationError(format!(
                "values of release {}: {}",
                self.name, e
            ))
        })
    }
}

/// Package manager boundary: install-or-upgrade and uninstall releases.
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    async fn install_or_upgrade(&self, release: &ChartRelease) -> Result<()>;

    /// Remove a release; succeeds if it is not installed
    async fn uninstall(&self, name: &str, namespace: &str) -> Result<()>;
}

/// Runs the `helm` binary found on `PATH` (or at `binary`)
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: String,
}

impl HelmCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String], stdin: Option<String>) -> Result<String> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ShipyardError::HelmError(format!("failed to run {}: {}", self.binary, e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| ShipyardError::HelmError(format!("failed to write values: {}", e)))?;
            // Close stdin so helm stops reading
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ShipyardError::HelmError(format!("helm did not finish: {}", e)))?;

        if !output.status.success() {
            return Err(ShipyardError::HelmError(format!(
                "helm {} exited with {}: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[async_trait]
impl ChartInstaller for HelmCli {
    #[instrument(skip(self, release), fields(release = %release.name, namespace = %release.namespace))]
    async fn install_or_upgrade(&self, release: &ChartRelease) -> Result<()> {
        info!(
            "Installing chart {} from {} as release {}",
            release.chart, release.repo_url, release.name
        );
        let values = release.values_yaml()?;
        self.run(&release.install_args(), Some(values)).await?;
        info!("Release {} installed", release.name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn uninstall(&self, name: &str, namespace: &str) -> Result<()> {
        let args: Vec<String> = [
            "uninstall",
            name,
            "--namespace",
            namespace,
            "--ignore-not-found",
            "--wait",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        self.run(&args, None).await?;
        info!("Release {} uninstalled", name);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records install/uninstall calls instead of running helm
    #[derive(Clone, Default)]
    pub(crate) struct RecordingInstaller {
        pub calls: Arc<Mutex<Vec<String>>>,
        pub fail: bool,
    }

    impl RecordingInstaller {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChartInstaller for RecordingInstaller {
        async fn install_or_upgrade(&self, release: &ChartRelease) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("install {}/{}", release.namespace, release.name));
            if self.fail {
                return Err(ShipyardError::HelmError("boom".into()));
            }
            Ok(())
        }

        async fn uninstall(&self, name: &str, namespace: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("uninstall {}/{}", namespace, name));
            Ok(())
        }
    }

    fn release() -> ChartRelease {
        ChartRelease {
            name: "postgresql".to_string(),
            chart: "postgresql".to_string(),
            repo_url: "https://charts.bitnami.com/bitnami".to_string(),
            namespace: "databases".to_string(),
            version: Some("16.4.2".to_string()),
            values: serde_json::json!({
                "auth": {"existingSecret": "postgresql-auth"},
                "primary": {"persistence": {"size": "10Gi"}}
            }),
        }
    }

    #[test]
    fn test_install_args() {
        assert_eq!(
            release().install_args(),
            vec![
                "upgrade",
                "--install",
                "postgresql",
                "postgresql",
                "--repo",
                "https://charts.bitnami.com/bitnami",
                "--namespace",
                "databases",
                "--create-namespace",
                "--version",
                "16.4.2",
                "-f",
                "-",
            ]
        );
    }

    #[test]
    fn test_install_args_without_version() {
        let mut release = release();
        release.version = None;
        assert!(!release.install_args().contains(&"--version".to_string()));
    }

    #[test]
    fn test_values_yaml_is_nested() {
        let yaml = release().values_yaml().unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            parsed["primary"]["persistence"]["size"].as_str(),
            Some("10Gi")
        );
        assert_eq!(
            parsed["auth"]["existingSecret"].as_str(),
            Some("postgresql-auth")
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let helm = HelmCli::new("/nonexistent/helm");
        let result = helm.uninstall("redis", "databases").await;
        assert!(matches!(result, Err(ShipyardError::HelmError(_))));
    }
}
