// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Names of the secrets stored in a repository.
//!
//! Listings are parsed strictly: one malformed entry rejects the whole inventory
//! rather than being skipped, so a garbled response can never hide a secret.

use crate::error::{Result, ShipyardError};
use serde::Deserialize;
use std::collections::BTreeSet;

/// One page of `GET /repos/{owner}/{repo}/actions/secrets`
#[derive(Debug, Clone, Deserialize)]
pub struct SecretsPage {
    pub total_count: usize,
    pub secrets: Vec<SecretEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretEntry {
    pub name: String,
}

impl SecretsPage {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| ShipyardError::InvalidInventory(format!("unexpected listing format: {}", e)))
    }
}

/// Secret names are stored upper-case and compared case-insensitively
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretInventory {
    names: BTreeSet<String>,
}

impl SecretInventory {
    /// Combine every page of a listing, checking it against the reported total
    pub fn from_pages(pages: &[SecretsPage]) -> Result<Self> {
        let Some(first) = pages.first() else {
            return Err(ShipyardError::InvalidInventory("listing has no pages".to_string()));
        };
        let total = first.total_count;

        let mut names = BTreeSet::new();
        for (index, page) in pages.iter().enumerate() {
            if page.total_count != total {
                return Err(ShipyardError::InvalidInventory(format!(
                    "page {} reports {} secrets, page 1 reported {}",
                    index + 1,
                    page.total_count,
                    total
                )));
            }
            for entry in &page.secrets {
                let name = validate_name(&entry.name)?;
                if !names.insert(name) {
                    return Err(ShipyardError::InvalidInventory(format!(
                        "secret '{}' listed twice",
                        entry.name
                    )));
                }
            }
        }

        if names.len() != total {
            return Err(ShipyardError::InvalidInventory(format!(
                "listing contains {} secrets but reports total_count {}",
                names.len(),
                total
            )));
        }
        Ok(Self { names })
    }

    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| validate_name(n.as_ref()))
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self { names })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, returned upper-cased
pub fn validate_name(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(ShipyardError::InvalidInventory(format!(
            "'{}' is not a valid secret name",
            name
        )));
    }
    Ok(name.to_ascii_uppercase())
}
