//! ENS lookups through `eth_call`.
//!
//! Two reads per lookup: the registry's `resolver(bytes32)` and the
//! resolver's multi-coin `addr(bytes32,uint256)` (ENSIP-9). Ethereum
//! records fall back to the legacy `addr(bytes32)` for resolvers that
//! predate multi-coin support.

use async_trait::async_trait;
use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::{Address, U256};
use std::str::FromStr;
use std::sync::Arc;

use super::name::NormalizedName;
use super::NameService;
use crate::chains::{coin_types, ChainDescriptor};
use crate::error::{SendError, SendResult};
use crate::rpc::{read_with_retry, ChainRpc, RpcError};
use crate::{log_debug, log_warn};

/// ENS registry, same address on mainnet and Sepolia
pub const ENS_REGISTRY: &str = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e";

/// `resolver(bytes32)`
const RESOLVER_SELECTOR: [u8; 4] = [0x01, 0x78, 0xb8, 0xbf];
/// `addr(bytes32,uint256)`
const ADDR_MULTICOIN_SELECTOR: [u8; 4] = [0xf1, 0xcb, 0x7e, 0x06];
/// `addr(bytes32)`
const ADDR_LEGACY_SELECTOR: [u8; 4] = [0x3b, 0x3b, 0x57, 0xde];

/// [`NameService`] backed by the ENS contracts
pub struct EnsNameService {
    rpc: Arc<dyn ChainRpc>,
    registry: Address,
}

impl EnsNameService {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> SendResult<Self> {
        Self::with_registry(rpc, ENS_REGISTRY)
    }

    pub fn with_registry(rpc: Arc<dyn ChainRpc>, registry: &str) -> SendResult<Self> {
        let registry = Address::from_str(registry)
            .map_err(|e| SendError::config(format!("Invalid ENS registry address: {}", e)))?;
        Ok(Self { rpc, registry })
    }

    async fn call(&self, chain: &ChainDescriptor, to: Address, data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        read_with_retry("eth_call", || self.rpc.call(chain, to, &data)).await
    }

    async fn resolver_for(&self, chain: &ChainDescriptor, node: [u8; 32]) -> SendResult<Option<Address>> {
        let output = self
            .call(chain, self.registry, encode_call(RESOLVER_SELECTOR, &[Token::FixedBytes(node.to_vec())]))
            .await?;
        let resolver = decode_address(&output)?;
        Ok(if resolver.is_zero() { None } else { Some(resolver) })
    }
}

#[async_trait]
impl NameService for EnsNameService {
    async fn resolve_record(
        &self,
        naming_chain: &ChainDescriptor,
        name: &NormalizedName,
        coin_type: u32,
    ) -> SendResult<Option<Vec<u8>>> {
        let node = name.namehash();
        let resolver = match self.resolver_for(naming_chain, node).await? {
            Some(resolver) => resolver,
            None => {
                log_debug!("ens", "No resolver set", name = name);
                return Ok(None);
            }
        };

        let data = encode_call(
            ADDR_MULTICOIN_SELECTOR,
            &[Token::FixedBytes(node.to_vec()), Token::Uint(U256::from(coin_type))],
        );

        let record = match self.call(naming_chain, resolver, data).await {
            Ok(output) => decode_bytes(&output)?,
            Err(RpcError::Node { message, .. }) if coin_type == coin_types::ETHEREUM => {
                log_warn!("ens", "Multi-coin addr reverted, trying legacy addr", reason = message);
                let legacy = encode_call(ADDR_LEGACY_SELECTOR, &[Token::FixedBytes(node.to_vec())]);
                let output = self.call(naming_chain, resolver, legacy).await?;
                let address = decode_address(&output)?;
                if address.is_zero() {
                    Vec::new()
                } else {
                    address.as_bytes().to_vec()
                }
            }
            Err(e) => return Err(e.into()),
        };

        Ok(if record.is_empty() { None } else { Some(record) })
    }
}

fn encode_call(selector: [u8; 4], args: &[Token]) -> Vec<u8> {
    let mut data = selector.to_vec();
    data.extend_from_slice(&abi::encode(args));
    data
}

fn decode_address(output: &[u8]) -> SendResult<Address> {
    if output.is_empty() {
        return Ok(Address::zero());
    }
    match abi::decode(&[ParamType::Address], output) {
        Ok(tokens) => match tokens.into_iter().next() {
            Some(Token::Address(address)) => Ok(address),
            _ => Err(SendError::network("Naming service returned an unexpected type")),
        },
        Err(e) => Err(SendError::network(format!("Malformed naming service response: {}", e))),
    }
}

fn decode_bytes(output: &[u8]) -> SendResult<Vec<u8>> {
    if output.is_empty() {
        return Ok(Vec::new());
    }
    match abi::decode(&[ParamType::Bytes], output) {
        Ok(tokens) => match tokens.into_iter().next() {
            Some(Token::Bytes(bytes)) => Ok(bytes),
            _ => Err(SendError::network("Naming service returned an unexpected type")),
        },
        Err(e) => Err(SendError::network(format!("Malformed naming service response: {}", e))),
    }
}
