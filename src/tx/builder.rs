//! Unsigned Transaction Builder
//!
//! Assembles the canonical unsigned record from a resolved recipient,
//! chain parameters and account state. Validation runs before any network
//! read; the nonce is read through on every build and never cached.

use ethers_core::types::{Address, U256};
use serde::Serialize;
use std::sync::Arc;

use super::fees::{self, FeeQuote};
use crate::chains::{ChainDescriptor, ChainRegistry};
use crate::error::{SendError, SendResult};
use crate::log_debug;
use crate::resolver::encoding::EVM_ADDRESS_LEN;
use crate::rpc::{read_with_retry, ChainRpc};
use crate::types::{ChainId, ResolvedAddress, TxEnvelope};

/// A transaction ready to be serialized for signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsignedTransaction {
    pub chain_id: ChainId,
    pub envelope: TxEnvelope,
    pub to: ResolvedAddress,
    /// Value in base units (wei)
    pub value: U256,
    pub fees: FeeQuote,
    /// Gas limit
    pub fee_limit: u64,
    /// Next account nonce at build time, may be stale by broadcast
    pub nonce: U256,
    #[serde(with = "crate::serde_bytes::hex_vec")]
    pub data: Vec<u8>,
}

impl UnsignedTransaction {
    /// Recipient as an EVM address
    pub fn to_address(&self) -> SendResult<Address> {
        evm_address(&self.to)
    }
}

fn evm_address(to: &ResolvedAddress) -> SendResult<Address> {
    let bytes = to.address_bytes();
    if bytes.len() != EVM_ADDRESS_LEN {
        return Err(SendError::unresolvable_recipient(format!(
            "{} is not a {}-byte account address",
            to.display_form(),
            EVM_ADDRESS_LEN
        )));
    }
    Ok(Address::from_slice(bytes))
}

/// Reject zero amounts and zero fee limits
pub fn validate_amounts(value: U256, fee_limit: u64) -> SendResult<()> {
    if value.is_zero() {
        return Err(SendError::invalid_amount("Amount must be greater than zero"));
    }
    if fee_limit == 0 {
        return Err(SendError::invalid_amount("Fee limit must be greater than zero"));
    }
    Ok(())
}

/// Checks that need no network access
pub fn precheck<'a>(
    registry: &'a ChainRegistry,
    chain_id: ChainId,
    to: &ResolvedAddress,
    value: U256,
    fee_limit: u64,
) -> SendResult<(&'a ChainDescriptor, TxEnvelope)> {
    let descriptor = registry.get(chain_id)?;
    validate_amounts(value, fee_limit)?;

    let envelope = descriptor.envelope.ok_or_else(|| {
        SendError::unsupported_chain(format!(
            "{} can be resolved against but not transacted on",
            descriptor.key
        ))
    })?;

    if to.chain_id() != chain_id {
        return Err(SendError::unresolvable_recipient(format!(
            "Recipient was resolved for chain {}, not {}",
            to.chain_id(),
            chain_id
        )));
    }
    evm_address(to)?;

    Ok((descriptor, envelope))
}

/// Assemble an unsigned transaction from already-known account state
pub fn assemble_unsigned(
    registry: &ChainRegistry,
    chain_id: ChainId,
    to: &ResolvedAddress,
    value: U256,
    fees: FeeQuote,
    fee_limit: u64,
    nonce: U256,
) -> SendResult<UnsignedTransaction> {
    let (_, envelope) = precheck(registry, chain_id, to, value, fee_limit)?;

    let fees = match (envelope, fees.priority_fee_per_unit) {
        (TxEnvelope::Legacy, _) => FeeQuote::legacy(fees.fee_per_unit),
        (TxEnvelope::Eip1559, Some(priority)) => FeeQuote::dynamic(fees.fee_per_unit, priority),
        (TxEnvelope::Eip1559, None) => FeeQuote::dynamic(fees.fee_per_unit, U256::zero()),
    };

    Ok(UnsignedTransaction {
        chain_id,
        envelope,
        to: to.clone(),
        value,
        fees,
        fee_limit,
        nonce,
        data: Vec::new(),
    })
}

pub struct TransactionBuilder {
    registry: Arc<ChainRegistry>,
    rpc: Arc<dyn ChainRpc>,
}

impl TransactionBuilder {
    pub fn new(registry: Arc<ChainRegistry>, rpc: Arc<dyn ChainRpc>) -> Self {
        Self { registry, rpc }
    }

    /// Build an unsigned transfer of `value` base units from `account`.
    ///
    /// `fee_per_unit` is the gas price (legacy) or fee cap (EIP-1559) in
    /// wei; when absent it is quoted from the chain.
    pub async fn build(
        &self,
        chain_id: ChainId,
        to: &ResolvedAddress,
        value: U256,
        fee_per_unit: Option<U256>,
        fee_limit: u64,
        account: Address,
    ) -> SendResult<UnsignedTransaction> {
        let (descriptor, envelope) = precheck(&self.registry, chain_id, to, value, fee_limit)?;
        if let Some(fee) = fee_per_unit {
            if fee.is_zero() {
                return Err(SendError::invalid_amount("Fee per unit must be greater than zero"));
            }
        }

        let rpc = self.rpc.as_ref();
        let nonce = read_with_retry("eth_getTransactionCount", || {
            rpc.transaction_count(descriptor, account)
        })
        .await?;
        let quote = fees::quote(rpc, descriptor, envelope, fee_per_unit).await?;

        log_debug!(
            "builder",
            "Built unsigned transaction",
            chain = descriptor.key,
            nonce = nonce,
            fee_per_unit = quote.fee_per_unit,
            fee_limit = fee_limit,
        );

        assemble_unsigned(&self.registry, chain_id, to, value, quote, fee_limit, nonce)
    }
}
