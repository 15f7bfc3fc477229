// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Masking helpers for anything credential-shaped that ends up in a log line.

use std::fmt;

/// Characters shown at each end of a masked identifier
const PREVIEW_CHARS: usize = 2;
/// Identifiers shorter than this are masked entirely
const MIN_PREVIEW_LEN: usize = 8;

/// Fixed-width preview of a username-like value: `ab****yz`.
///
/// Never reveals more than [`PREVIEW_CHARS`] contiguous characters.
pub fn mask_identifier(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < MIN_PREVIEW_LEN {
        return "********".to_string();
    }
    let head: String = chars[..PREVIEW_CHARS].iter().collect();
    let tail: String = chars[chars.len() - PREVIEW_CHARS..].iter().collect();
    format!("{head}****{tail}")
}

/// Password-like values are only ever described by their length.
pub fn mask_secret(value: &str) -> String {
    format!("****** ({} chars)", value.chars().count())
}

/// Replace every occurrence of each secret in `text` with a mask.
///
/// Used on stderr of external tools, which may echo the statement they failed on.
pub fn scrub(text: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_string(), |acc, s| acc.replace(s, "******"))
}

/// Display adapter for password-like values in `tracing` fields.
pub struct Masked<'a>(pub &'a str);

impl fmt::Display for Masked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&mask_secret(self.0))
    }
}

impl fmt::Debug for Masked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
