//! Key Derivation Path Handling
//!
//! Parses BIP-32 paths for the signing device, flags unusual account paths,
//! and encodes paths into the APDU form the Ethereum app expects:
//! one component-count byte followed by each index as big-endian `u32`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SendError;

/// Hardened offset for BIP-32 derivation
pub const HARDENED: u32 = 0x8000_0000;

/// Most components the Ethereum app accepts in one path
pub const MAX_COMPONENTS: usize = 10;

const BIP44: u32 = 44;
const ETHEREUM_COIN_TYPE: u32 = 60;

/// Single component of a derivation path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationComponent {
    pub index: u32,
    pub hardened: bool,
}

impl DerivationComponent {
    pub fn new(index: u32, hardened: bool) -> Self {
        Self { index, hardened }
    }

    /// Index including the hardened bit
    pub fn full_index(&self) -> u32 {
        if self.hardened {
            self.index | HARDENED
        } else {
            self.index
        }
    }
}

impl fmt::Display for DerivationComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// Parsed derivation path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath {
    components: Vec<DerivationComponent>,
}

impl DerivationPath {
    pub fn components(&self) -> &[DerivationComponent] {
        &self.components
    }

    pub fn purpose(&self) -> Option<u32> {
        self.components.first().map(|c| c.index)
    }

    pub fn coin_type(&self) -> Option<u32> {
        self.components.get(1).map(|c| c.index)
    }

    /// APDU path encoding
    pub fn to_apdu_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + 4 * self.components.len());
        bytes.push(self.components.len() as u8);
        for component in &self.components {
            bytes.extend_from_slice(&component.full_index().to_be_bytes());
        }
        bytes
    }

    /// Non-fatal observations about an account path
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.purpose() != Some(BIP44) {
            warnings.push(format!(
                "Purpose {} is not BIP44; the device may show a warning",
                self.purpose().unwrap_or_default()
            ));
        }
        if self.coin_type() != Some(ETHEREUM_COIN_TYPE) {
            warnings.push(format!(
                "Coin type {} is not the Ethereum coin type {}",
                self.coin_type().unwrap_or_default(),
                ETHEREUM_COIN_TYPE
            ));
        }
        if self.components.iter().take(3).any(|c| !c.hardened) {
            warnings.push("Purpose, coin type, and account should be hardened (')".to_string());
        }
        warnings
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = SendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_path(s).map_err(|e| SendError::config(format!("Invalid derivation path '{}': {}", s.trim(), e)))
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_path(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a derivation path string; the `m/` prefix is optional
fn parse_path(path: &str) -> Result<DerivationPath, String> {
    let trimmed = path.trim();

    let path_part = trimmed
        .strip_prefix("m/")
        .or_else(|| trimmed.strip_prefix("M/"))
        .unwrap_or(trimmed);
    if path_part.is_empty() || path_part == "m" {
        return Err("Empty derivation path".to_string());
    }

    let components = path_part
        .split('/')
        .map(parse_component)
        .collect::<Result<Vec<_>, _>>()?;

    if components.len() > MAX_COMPONENTS {
        return Err(format!(
            "Path has {} components, at most {} are supported",
            components.len(),
            MAX_COMPONENTS
        ));
    }

    Ok(DerivationPath { components })
}

/// Parse a single path component
fn parse_component(s: &str) -> Result<DerivationComponent, String> {
    let trimmed = s.trim();

    if trimmed.is_empty() {
        return Err("Empty path component".to_string());
    }

    let (number_str, hardened) = match trimmed.strip_suffix(['\'', 'h', 'H']) {
        Some(number) => (number, true),
        None => (trimmed, false),
    };

    let index: u32 = number_str
        .parse()
        .map_err(|e| format!("Invalid path component '{}': {}", s, e))?;

    if index >= HARDENED {
        return Err(format!("Path component {} exceeds maximum value", index));
    }

    Ok(DerivationComponent::new(index, hardened))
}
