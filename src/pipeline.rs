//! Signing & Broadcast Orchestrator
//!
//! Drives one transfer end to end:
//!
//! 1. validate the request (no network, no device)
//! 2. resolve the recipient and build the unsigned transaction
//! 3. serialize and have the hardware session sign it
//! 4. assemble, check the signer, broadcast
//! 5. optionally wait for confirmation
//!
//! Nothing before the broadcast is retried. Waiting never fails the
//! operation: an exhausted budget reports `TimedOut` with the hash.

use ethers_core::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::chains::{ChainDescriptor, ChainRegistry};
use crate::error::{SendError, SendResult};
use crate::hardware::SignerSession;
use crate::resolver::Resolver;
use crate::rpc::ChainRpc;
use crate::tx::{self, fees, BroadcastConfig, SignedTransaction, TransactionBuilder, TransactionCheck, TRANSFER_GAS_LIMIT};
use crate::types::{ChainId, ConfirmationStatus, FeeUnit, ResolvedAddress};
use crate::utils::crypto::to_checksum_address;
use crate::utils::BackoffPolicy;
use crate::{log_error, log_info};

/// Tunables for the orchestrator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub confirmation: BackoffPolicy,
    pub broadcast: BroadcastConfig,
    /// Gas limit when the request names none
    pub default_fee_limit: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            confirmation: BackoffPolicy::default(),
            broadcast: BroadcastConfig::default(),
            default_fee_limit: TRANSFER_GAS_LIMIT,
        }
    }
}

/// A transfer as the user expressed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub chain_id: ChainId,
    /// Name or native address
    pub recipient: String,
    /// Decimal amount of the native asset
    pub amount: String,
    /// Gas price / fee cap in `fee_unit`; quoted from the chain when absent
    pub fee_per_unit: Option<String>,
    pub fee_unit: FeeUnit,
    pub fee_limit: Option<u64>,
    /// Wait for confirmation before returning
    pub wait: bool,
}

impl TransferRequest {
    pub fn new(chain_id: ChainId, recipient: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            chain_id,
            recipient: recipient.into(),
            amount: amount.into(),
            fee_per_unit: None,
            fee_unit: FeeUnit::Gwei,
            fee_limit: None,
            wait: true,
        }
    }
}

/// A validated transfer with its recipient already resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    pub chain_id: ChainId,
    pub to: ResolvedAddress,
    /// Base units
    pub value: U256,
    /// Wei
    pub fee_per_unit: Option<U256>,
    pub fee_limit: u64,
    pub wait: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub chain_id: ChainId,
    pub tx_hash: H256,
    pub nonce: U256,
    pub recipient: String,
    pub explorer_url: String,
    pub status: ConfirmationStatus,
    /// Signed transaction, 0x-prefixed hex
    pub raw_tx: String,
}

/// Parsed amounts for a request, before any lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedAmounts {
    pub value: U256,
    pub fee_per_unit: Option<U256>,
    pub fee_limit: u64,
}

/// Check a request against a chain without network or device access
pub fn validate_request(
    descriptor: &ChainDescriptor,
    request: &TransferRequest,
    default_fee_limit: u64,
) -> SendResult<ValidatedAmounts> {
    let value = fees::parse_amount(&request.amount, descriptor.decimals)?;
    let fee_limit = request.fee_limit.unwrap_or(default_fee_limit);
    tx::builder::validate_amounts(value, fee_limit)?;

    let fee_per_unit = match &request.fee_per_unit {
        Some(fee) => {
            let wei = fees::parse_fee(fee, request.fee_unit)?;
            if wei.is_zero() {
                return Err(SendError::invalid_amount("Fee per unit must be greater than zero"));
            }
            Some(wei)
        }
        None => None,
    };

    if !descriptor.is_transactable() {
        return Err(SendError::unsupported_chain(format!(
            "{} can be resolved against but not transacted on",
            descriptor.key
        )));
    }

    Ok(ValidatedAmounts {
        value,
        fee_per_unit,
        fee_limit,
    })
}

pub struct SendPipeline<'s> {
    registry: Arc<ChainRegistry>,
    resolver: Arc<Resolver>,
    rpc: Arc<dyn ChainRpc>,
    builder: TransactionBuilder,
    session: &'s SignerSession,
    settings: PipelineSettings,
}

impl<'s> SendPipeline<'s> {
    pub fn new(
        registry: Arc<ChainRegistry>,
        resolver: Arc<Resolver>,
        rpc: Arc<dyn ChainRpc>,
        session: &'s SignerSession,
        settings: PipelineSettings,
    ) -> Self {
        let builder = TransactionBuilder::new(registry.clone(), rpc.clone());
        Self {
            registry,
            resolver,
            rpc,
            builder,
            session,
            settings,
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Validate a request and resolve its recipient
    pub async fn plan(&self, request: &TransferRequest) -> SendResult<TransferPlan> {
        let descriptor = self.registry.get(request.chain_id)?;
        let amounts = validate_request(descriptor, request, self.settings.default_fee_limit)?;
        self.resolve_plan(request, amounts).await
    }

    pub(crate) async fn resolve_plan(&self, request: &TransferRequest, amounts: ValidatedAmounts) -> SendResult<TransferPlan> {
        let to = self.resolver.resolve(&request.recipient, request.chain_id).await?;
        Ok(TransferPlan {
            chain_id: request.chain_id,
            to,
            value: amounts.value,
            fee_per_unit: amounts.fee_per_unit,
            fee_limit: amounts.fee_limit,
            wait: request.wait,
        })
    }

    /// Send a transfer described by a user request
    pub async fn send(&self, request: &TransferRequest) -> SendResult<SendOutcome> {
        let descriptor = self.registry.get(request.chain_id)?;
        let amounts = validate_request(descriptor, request, self.settings.default_fee_limit)?;
        self.session_account()?;

        let plan = self.resolve_plan(request, amounts).await?;
        self.execute(&plan).await
    }

    /// Account of the connected signer; fails fast when there is none
    pub fn session_account(&self) -> SendResult<Address> {
        self.session
            .address()
            .ok_or_else(|| SendError::device_unavailable("Signer is not connected"))
    }

    /// Build, sign, broadcast and track an already resolved transfer
    pub async fn execute(&self, plan: &TransferPlan) -> SendResult<SendOutcome> {
        let signed = self.prepare(plan).await?;
        self.submit(plan, &signed).await
    }

    /// Build and sign a transfer, checking the signature recovers to the
    /// session account. Nothing is sent to the chain.
    pub async fn prepare(&self, plan: &TransferPlan) -> SendResult<SignedTransaction> {
        let account = self.session_account()?;

        let unsigned = self
            .builder
            .build(plan.chain_id, &plan.to, plan.value, plan.fee_per_unit, plan.fee_limit, account)
            .await?;

        let payload = tx::serialize_unsigned(&unsigned)?;
        let signature = self.session.sign_transaction(&payload, plan.chain_id).await?;
        let signed = tx::assemble(unsigned, signature)?;

        let signer = signed.recover_signer()?;
        if signer != account {
            log_error!(
                "pipeline",
                "Signature does not recover to the session account",
                expected = to_checksum_address(account.as_bytes()),
                recovered = to_checksum_address(signer.as_bytes()),
            );
            self.session.disconnect().await;
            return Err(SendError::device_communication(
                "Device signed with a different key than the session account",
            ));
        }
        Ok(signed)
    }

    /// Broadcast a prepared transfer and optionally wait for it
    pub async fn submit(&self, plan: &TransferPlan, signed: &SignedTransaction) -> SendResult<SendOutcome> {
        let descriptor = self.registry.get(plan.chain_id)?;
        let hash = tx::broadcast(self.rpc.as_ref(), descriptor, signed, &self.settings.broadcast).await?;
        let hash_hex = format!("{:?}", hash);
        let status = self.confirm(plan.chain_id, hash, plan.wait).await?;

        log_info!(
            "pipeline",
            "Transfer finished",
            chain = descriptor.key,
            tx_hash = hash_hex,
            recipient = plan.to.display_form(),
        );

        Ok(SendOutcome {
            chain_id: plan.chain_id,
            tx_hash: hash,
            nonce: signed.unsigned.nonce,
            recipient: plan.to.display_form().to_string(),
            explorer_url: descriptor.explorer_tx_url(&hash_hex),
            status,
            raw_tx: signed.raw_hex(),
        })
    }

    /// Re-send exact signed bytes; never rebuilds or re-signs
    pub async fn resend(&self, chain_id: ChainId, raw: &[u8], hash: H256) -> SendResult<H256> {
        let descriptor = self.registry.get(chain_id)?;
        tx::broadcast_raw(self.rpc.as_ref(), descriptor, raw, hash, &self.settings.broadcast).await
    }

    /// Look a transaction up by hash once
    pub async fn check(&self, chain_id: ChainId, hash: H256) -> SendResult<TransactionCheck> {
        let descriptor = self.registry.get(chain_id)?;
        Ok(tx::check_transaction(self.rpc.as_ref(), descriptor, hash).await?)
    }

    /// Wait for a broadcast transaction, or report `Pending` without waiting
    pub async fn confirm(&self, chain_id: ChainId, hash: H256, wait: bool) -> SendResult<ConfirmationStatus> {
        let descriptor = self.registry.get(chain_id)?;
        if !wait {
            return Ok(ConfirmationStatus::Pending);
        }
        Ok(tx::wait_for_confirmation(self.rpc.as_ref(), descriptor, hash, &self.settings.confirmation).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{BASE_SEPOLIA, BITCOIN_TESTNET};
    use crate::error::ErrorCode;

    fn registry() -> ChainRegistry {
        ChainRegistry::builtin().unwrap()
    }

    #[test]
    fn test_validate_amounts_and_fees() {
        let registry = registry();
        let descriptor = registry.get(BASE_SEPOLIA).unwrap();
        let mut request = TransferRequest::new(BASE_SEPOLIA, "alice.eth", "0.01");
        request.fee_per_unit = Some("1.5".to_string());

        let amounts = validate_request(descriptor, &request, TRANSFER_GAS_LIMIT).unwrap();
        assert_eq!(amounts.value, U256::from(10_000_000_000_000_000u64));
        assert_eq!(amounts.fee_per_unit, Some(U256::from(1_500_000_000u64)));
        assert_eq!(amounts.fee_limit, 21_000);
    }

    #[test]
    fn test_zero_amount_is_invalid() {
        let registry = registry();
        let descriptor = registry.get(BASE_SEPOLIA).unwrap();
        for amount in ["0", "0.000", "-1", "abc"] {
            let request = TransferRequest::new(BASE_SEPOLIA, "alice.eth", amount);
            let err = validate_request(descriptor, &request, TRANSFER_GAS_LIMIT).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidAmount, "amount {}", amount);
        }
    }

    #[test]
    fn test_zero_fee_limit_is_invalid() {
        let registry = registry();
        let descriptor = registry.get(BASE_SEPOLIA).unwrap();
        let mut request = TransferRequest::new(BASE_SEPOLIA, "alice.eth", "1");
        request.fee_limit = Some(0);
        let err = validate_request(descriptor, &request, TRANSFER_GAS_LIMIT).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAmount);
    }

    #[test]
    fn test_resolution_only_chain_rejected() {
        let registry = registry();
        let descriptor = registry.get(BITCOIN_TESTNET).unwrap();
        let request = TransferRequest::new(BITCOIN_TESTNET, "alice.eth", "1");
        let err = validate_request(descriptor, &request, TRANSFER_GAS_LIMIT).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedChain);
    }
}
