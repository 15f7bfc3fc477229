// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod guard;
pub mod helm;
pub mod kubernetes;
pub mod outcome;
pub mod propagate;
pub mod provision;
pub mod redact;
pub mod resources;
pub mod types;
pub mod wait;

#[cfg(test)]
pub mod test_utils;
