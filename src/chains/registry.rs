use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use url::Url;

use crate::error::{ErrorCode, SendError, SendResult};
use crate::types::{AddressEncoding, BitcoinNetwork, ChainId, FeeUnit, TxEnvelope};

// =============================================================================
// Chain Identifiers
// =============================================================================

pub const ETHEREUM_MAINNET: ChainId = 1;
pub const ETHEREUM_SEPOLIA: ChainId = 11_155_111;
pub const BASE_MAINNET: ChainId = 8453;
pub const BASE_SEPOLIA: ChainId = 84_532;
/// Hardened SLIP-44 coin type 0
pub const BITCOIN_MAINNET: ChainId = 0x8000_0000;
/// Hardened SLIP-44 coin type 1
pub const BITCOIN_TESTNET: ChainId = 0x8000_0001;

/// Coin types used for naming-service address records (ENSIP-9 / ENSIP-11)
pub mod coin_types {
    pub const BITCOIN: u32 = 0;
    pub const ETHEREUM: u32 = 60;
    /// ENSIP-11 offset for EVM chains other than Ethereum mainnet
    pub const EVM_OFFSET: u32 = 0x8000_0000;

    /// ENSIP-11 coin type for an EVM chain id
    pub fn evm(chain_id: u64) -> u32 {
        EVM_OFFSET | (chain_id as u32 & !EVM_OFFSET)
    }
}

const EVM_PATH: &str = "m/44'/60'/0'/0/0";

// =============================================================================
// Descriptor
// =============================================================================

/// Immutable parameters for one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    pub chain_id: ChainId,
    /// Display key, e.g. `BASE-SEPOLIA`
    pub key: String,
    pub native_asset_symbol: String,
    pub decimals: u8,
    pub rpc_endpoint: Url,
    pub explorer_base_url: Url,
    pub derivation_path: String,
    pub fee_unit: FeeUnit,
    pub address_encoding: AddressEncoding,
    /// `None` for chains that can only be resolved against
    #[serde(default)]
    pub envelope: Option<TxEnvelope>,
    pub name_coin_type: u32,
    /// Chain whose naming deployment answers lookups for this chain
    pub naming_chain_id: ChainId,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
}

fn default_confirmations() -> u64 {
    1
}

impl ChainDescriptor {
    /// Explorer link for a transaction hash
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}{}", self.explorer_base_url, tx_hash)
    }

    pub fn is_transactable(&self) -> bool {
        self.envelope.is_some()
    }

    fn validate(&self) -> SendResult<()> {
        if self.key.trim().is_empty() {
            return Err(SendError::config(format!("Chain {} has an empty key", self.chain_id)));
        }
        if self.envelope.is_some() && !self.address_encoding.is_evm() {
            return Err(SendError::config(format!(
                "Chain {} declares a transaction envelope for a non-EVM address encoding",
                self.key
            )));
        }
        if self.confirmations == 0 {
            return Err(SendError::config(format!(
                "Chain {} must require at least one confirmation",
                self.key
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Read-only lookup of chain descriptors keyed by chain id
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<ChainId, ChainDescriptor>,
}

impl ChainRegistry {
    /// Registry with no chains (tests)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in chains
    pub fn builtin() -> SendResult<Self> {
        let mut registry = Self::empty();
        for descriptor in builtin_descriptors()? {
            registry.insert(descriptor)?;
        }
        Ok(registry)
    }

    /// Built-ins, then replacement descriptors, then RPC endpoint overrides
    pub fn with_overrides(
        extra: &[ChainDescriptor],
        rpc_overrides: &HashMap<ChainId, Url>,
    ) -> SendResult<Self> {
        let mut registry = Self::builtin()?;
        for descriptor in extra {
            registry.insert(descriptor.clone())?;
        }
        for (chain_id, url) in rpc_overrides {
            let descriptor = registry
                .chains
                .get_mut(chain_id)
                .ok_or_else(|| SendError::unknown_chain(*chain_id).with_details("in rpc override"))?;
            descriptor.rpc_endpoint = url.clone();
        }
        Ok(registry)
    }

    /// Add or replace a descriptor
    pub fn insert(&mut self, descriptor: ChainDescriptor) -> SendResult<()> {
        descriptor.validate()?;
        self.chains.insert(descriptor.chain_id, descriptor);
        Ok(())
    }

    pub fn get(&self, chain_id: ChainId) -> SendResult<&ChainDescriptor> {
        self.chains
            .get(&chain_id)
            .ok_or_else(|| SendError::unknown_chain(chain_id))
    }

    /// Look up by numeric id or case-insensitive key (`base-sepolia`, `84532`)
    pub fn lookup(&self, chain: &str) -> SendResult<&ChainDescriptor> {
        let trimmed = chain.trim();
        if let Ok(id) = trimmed.parse::<ChainId>() {
            return self.get(id);
        }
        let wanted = trimmed.to_uppercase().replace('_', "-");
        self.chains
            .values()
            .find(|d| d.key.eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| SendError::new(ErrorCode::UnknownChain, format!("Unknown chain: {}", chain)))
    }

    pub fn supports(&self, chain_id: ChainId) -> bool {
        self.chains.contains_key(&chain_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[allow(clippy::too_many_arguments)]
fn evm_chain(
    chain_id: ChainId,
    key: &str,
    rpc: &str,
    explorer: &str,
    envelope: TxEnvelope,
    name_coin_type: u32,
    naming_chain_id: ChainId,
    confirmations: u64,
) -> SendResult<ChainDescriptor> {
    Ok(ChainDescriptor {
        chain_id,
        key: key.to_string(),
        native_asset_symbol: "ETH".to_string(),
        decimals: 18,
        rpc_endpoint: Url::parse(rpc)?,
        explorer_base_url: Url::parse(explorer)?,
        derivation_path: EVM_PATH.to_string(),
        fee_unit: FeeUnit::Wei,
        address_encoding: AddressEncoding::Evm,
        envelope: Some(envelope),
        name_coin_type,
        naming_chain_id,
        confirmations,
    })
}

fn bitcoin_chain(
    chain_id: ChainId,
    key: &str,
    network: BitcoinNetwork,
    explorer: &str,
    naming_chain_id: ChainId,
) -> SendResult<ChainDescriptor> {
    let coin = chain_id as u32 & !coin_types::EVM_OFFSET;
    Ok(ChainDescriptor {
        chain_id,
        key: key.to_string(),
        native_asset_symbol: "BTC".to_string(),
        decimals: 8,
        rpc_endpoint: Url::parse(explorer)?.join("../api/")?,
        explorer_base_url: Url::parse(explorer)?,
        derivation_path: format!("m/84'/{}'/0'/0/0", coin),
        fee_unit: FeeUnit::Wei,
        address_encoding: AddressEncoding::Bitcoin { network },
        envelope: None,
        name_coin_type: coin_types::BITCOIN,
        naming_chain_id,
        confirmations: if network == BitcoinNetwork::Mainnet { 6 } else { 1 },
    })
}

fn builtin_descriptors() -> SendResult<Vec<ChainDescriptor>> {
    Ok(vec![
        evm_chain(
            ETHEREUM_MAINNET,
            "ETH",
            "https://ethereum-rpc.publicnode.com",
            "https://etherscan.io/tx/",
            TxEnvelope::Eip1559,
            coin_types::ETHEREUM,
            ETHEREUM_MAINNET,
            12,
        )?,
        evm_chain(
            ETHEREUM_SEPOLIA,
            "ETH-SEPOLIA",
            "https://rpc.sepolia.org",
            "https://sepolia.etherscan.io/tx/",
            TxEnvelope::Legacy,
            coin_types::ETHEREUM,
            ETHEREUM_SEPOLIA,
            1,
        )?,
        evm_chain(
            BASE_MAINNET,
            "BASE",
            "https://mainnet.base.org",
            "https://basescan.org/tx/",
            TxEnvelope::Eip1559,
            coin_types::evm(BASE_MAINNET),
            ETHEREUM_MAINNET,
            1,
        )?,
        evm_chain(
            BASE_SEPOLIA,
            "BASE-SEPOLIA",
            "https://sepolia.base.org",
            "https://base-sepolia.blockscout.com/tx/",
            TxEnvelope::Legacy,
            coin_types::evm(BASE_SEPOLIA),
            ETHEREUM_SEPOLIA,
            1,
        )?,
        bitcoin_chain(
            BITCOIN_MAINNET,
            "BTC",
            BitcoinNetwork::Mainnet,
            "https://mempool.space/tx/",
            ETHEREUM_MAINNET,
        )?,
        bitcoin_chain(
            BITCOIN_TESTNET,
            "BTC-TESTNET",
            BitcoinNetwork::Testnet,
            "https://mempool.space/testnet/tx/",
            ETHEREUM_SEPOLIA,
        )?,
    ])
}
