//! Shared types for hwsend
//!
//! Value objects that cross module boundaries: chain tags, resolved
//! recipients, signature material and confirmation outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric chain identifier (EIP-155 id for EVM chains)
pub type ChainId = u64;

// =============================================================================
// Chain Tags
// =============================================================================

/// Unit a user-supplied fee-per-unit value is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeUnit {
    Wei,
    Gwei,
}

impl FeeUnit {
    /// Decimal places between this unit and wei
    pub fn decimals(&self) -> u32 {
        match self {
            FeeUnit::Wei => 0,
            FeeUnit::Gwei => 9,
        }
    }
}

impl fmt::Display for FeeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeUnit::Wei => write!(f, "wei"),
            FeeUnit::Gwei => write!(f, "gwei"),
        }
    }
}

impl FromStr for FeeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wei" => Ok(FeeUnit::Wei),
            "gwei" => Ok(FeeUnit::Gwei),
            _ => Err(format!("Unknown fee unit: {}", s)),
        }
    }
}

/// Wire format used when serializing a transaction for a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxEnvelope {
    /// EIP-155 replay-protected legacy transaction
    Legacy,
    /// EIP-1559 dynamic fee transaction (type 2)
    Eip1559,
}

/// Bitcoin network an address must belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitcoinNetwork {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl BitcoinNetwork {
    pub fn network(&self) -> bitcoin::Network {
        match self {
            BitcoinNetwork::Mainnet => bitcoin::Network::Bitcoin,
            BitcoinNetwork::Testnet => bitcoin::Network::Testnet,
            BitcoinNetwork::Signet => bitcoin::Network::Signet,
            BitcoinNetwork::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// How a chain encodes addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressEncoding {
    /// 20-byte account address, EIP-55 display
    Evm,
    /// scriptPubKey bytes, network address display
    Bitcoin { network: BitcoinNetwork },
}

impl AddressEncoding {
    pub fn is_evm(&self) -> bool {
        matches!(self, AddressEncoding::Evm)
    }
}

// =============================================================================
// Resolved Recipient
// =============================================================================

/// Where a resolved address came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum AddressSource {
    /// Input was already a native address
    Native,
    /// Input was a name, stored in normalized form
    Name(String),
}

/// A recipient that has been validated and re-encoded for one chain.
///
/// Only the resolver constructs these; the transaction builder never
/// accepts a raw identifier. Deserializing is for records this crate
/// wrote itself, such as the bridge intent ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    chain_id: ChainId,
    #[serde(with = "crate::serde_bytes::hex_vec")]
    address_bytes: Vec<u8>,
    display_form: String,
    source: AddressSource,
}

impl ResolvedAddress {
    pub(crate) fn new(
        chain_id: ChainId,
        address_bytes: Vec<u8>,
        display_form: String,
        source: AddressSource,
    ) -> Self {
        Self {
            chain_id,
            address_bytes,
            display_form,
            source,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn address_bytes(&self) -> &[u8] {
        &self.address_bytes
    }

    pub fn display_form(&self) -> &str {
        &self.display_form
    }

    pub fn source(&self) -> &AddressSource {
        &self.source
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_form)
    }
}

// =============================================================================
// Signature Material
// =============================================================================

/// ECDSA signature components returned by the signer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignatureMaterial {
    #[serde(with = "crate::serde_bytes::hex32")]
    r: [u8; 32],
    #[serde(with = "crate::serde_bytes::hex32")]
    s: [u8; 32],
    recovery_id: u8,
}

impl SignatureMaterial {
    pub(crate) fn new(r: [u8; 32], s: [u8; 32], recovery_id: u8) -> Self {
        Self { r, s, recovery_id }
    }

    pub fn r(&self) -> &[u8; 32] {
        &self.r
    }

    pub fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// Recovery id, always 0 or 1
    pub fn recovery_id(&self) -> u8 {
        self.recovery_id
    }
}

// =============================================================================
// Confirmation Status
// =============================================================================

/// Outcome of waiting for a broadcast transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmationStatus {
    /// Mined with at least the chain's required confirmations
    Confirmed { block_number: u64, confirmations: u64 },
    /// Broadcast accepted, caller chose not to wait
    Pending,
    /// Polling budget exhausted before confirmation
    TimedOut,
    /// Mined but execution failed
    Reverted { block_number: u64 },
}

impl ConfirmationStatus {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ConfirmationStatus::Confirmed { .. } | ConfirmationStatus::Reverted { .. }
        )
    }
}
