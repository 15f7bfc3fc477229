// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Third-party custom resources created during provisioning.

pub mod application;
pub mod cluster_issuer;

pub use application::Application;
pub use cluster_issuer::ClusterIssuer;
