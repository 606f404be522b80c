//! Human-readable name grammar, normalization and ENS namehash.

use std::fmt;
use unicode_normalization::UnicodeNormalization;

use crate::utils::crypto::keccak256;

/// Suffix accepted when none are configured
pub const DEFAULT_SUFFIX: &str = "eth";

/// A name that matched the grammar, in normalized form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedName(String);

impl NormalizedName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ENS namehash of the normalized name
    pub fn namehash(&self) -> [u8; 32] {
        namehash(&self.0)
    }
}

impl fmt::Display for NormalizedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decides whether an identifier is a name rather than a native address
#[derive(Debug, Clone)]
pub struct NameGrammar {
    suffixes: Vec<String>,
}

impl Default for NameGrammar {
    fn default() -> Self {
        Self::new([DEFAULT_SUFFIX])
    }
}

impl NameGrammar {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let suffixes = suffixes
            .into_iter()
            .map(|s| normalize(s.as_ref().trim_start_matches('.')))
            .filter(|s| !s.is_empty())
            .collect();
        Self { suffixes }
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    /// Returns the normalized name if `input` is a name under a known suffix
    pub fn parse(&self, input: &str) -> Option<NormalizedName> {
        let normalized = normalize(input);
        if normalized.is_empty()
            || normalized.chars().any(|c| c.is_whitespace() || matches!(c, '/' | ':' | '@'))
        {
            return None;
        }

        let labels: Vec<&str> = normalized.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
            return None;
        }

        let tld = labels[labels.len() - 1];
        if !self.suffixes.iter().any(|s| s == tld) {
            return None;
        }

        Some(NormalizedName(normalized))
    }
}

/// Trim, NFC-normalize and lower-case a name
pub fn normalize(input: &str) -> String {
    input.trim().nfc().collect::<String>().to_lowercase()
}

/// ENS namehash: recursive keccak over labels, right to left
pub fn namehash(name: &str) -> [u8; 32] {
    let mut node = [0u8; 32];
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&node);
        buf[32..].copy_from_slice(&label_hash);
        node = keccak256(&buf);
    }
    node
}
