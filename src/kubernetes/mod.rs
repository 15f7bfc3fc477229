// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes helpers for CRD discovery, secrets and workload readiness.

pub mod crd;
pub mod secrets;
pub mod workloads;

pub use crd::{crd_available, CrdRef};
pub use secrets::{apply_secret, build_secret, read_secret_value};
