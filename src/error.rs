// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShipyardError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Source control API error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Resource not ready: {0}")]
    TransientUnavailable(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Secret propagation timed out: {0}")]
    PropagationTimeout(String),

    #[error("Destructive operation requires explicit opt-in: {0}")]
    DestructiveOperationRequested(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Helm command failed: {0}")]
    HelmError(String),

    #[error("SQL execution failed: {0}")]
    SqlExecError(String),

    #[error("Invalid service name: {0}")]
    InvalidServiceName(String),

    #[error("Invalid secret inventory: {0}")]
    InvalidInventory(String),

    #[error("Invalid repository reference: {0}")]
    InvalidRepository(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Serialization failed: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, ShipyardError>;
