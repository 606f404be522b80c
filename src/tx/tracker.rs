//! Transaction Tracker
//!
//! Polls a chain for a broadcast transaction's receipt until it reaches the
//! chain's required confirmation depth or the polling budget runs out.

use ethers_core::types::H256;
use serde::{Deserialize, Serialize};

use crate::chains::ChainDescriptor;
use crate::rpc::{ChainRpc, RpcError};
use crate::types::ConfirmationStatus;
use crate::utils::BackoffPolicy;
use crate::{log_debug, log_info, log_warn};

/// Status of a transaction at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// No receipt yet
    Pending,
    /// Mined but below the required depth
    Confirming,
    /// Mined with enough confirmations
    Confirmed,
    /// Mined and reverted
    Failed,
}

/// Result of one receipt check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransactionCheck {
    pub status: TxStatus,
    pub block_number: Option<u64>,
    pub confirmations: u64,
}

impl TransactionCheck {
    fn pending() -> Self {
        Self {
            status: TxStatus::Pending,
            block_number: None,
            confirmations: 0,
        }
    }

    /// Progress towards the required depth (0.0 to 1.0)
    pub fn progress(&self, required: u64) -> f64 {
        if required == 0 {
            return 1.0;
        }
        (self.confirmations as f64 / required as f64).min(1.0)
    }
}

/// Check a transaction once
pub async fn check_transaction(
    rpc: &dyn ChainRpc,
    chain: &ChainDescriptor,
    hash: H256,
) -> Result<TransactionCheck, RpcError> {
    let receipt = match rpc.transaction_receipt(chain, hash).await? {
        Some(receipt) => receipt,
        None => return Ok(TransactionCheck::pending()),
    };
    let block = match receipt.block_number {
        Some(block) => block.as_u64(),
        None => return Ok(TransactionCheck::pending()),
    };

    if !receipt.succeeded() {
        return Ok(TransactionCheck {
            status: TxStatus::Failed,
            block_number: Some(block),
            confirmations: 0,
        });
    }

    let latest = rpc.block_number(chain).await?;
    let confirmations = latest.saturating_sub(block) + 1;
    let status = if confirmations >= chain.confirmations {
        TxStatus::Confirmed
    } else {
        TxStatus::Confirming
    };

    Ok(TransactionCheck {
        status,
        block_number: Some(block),
        confirmations,
    })
}

/// Poll until confirmed, reverted or out of attempts.
///
/// Failed checks count against the budget like any other attempt.
pub async fn wait_for_confirmation(
    rpc: &dyn ChainRpc,
    chain: &ChainDescriptor,
    hash: H256,
    policy: &BackoffPolicy,
) -> ConfirmationStatus {
    let attempts = policy.max_attempts.max(1);

    for attempt in 0..attempts {
        match check_transaction(rpc, chain, hash).await {
            Ok(TransactionCheck {
                status: TxStatus::Confirmed,
                block_number: Some(block_number),
                confirmations,
            }) => {
                log_info!(
                    "tracker",
                    "Transaction confirmed",
                    tx_hash = format!("{:?}", hash),
                    block = block_number,
                    confirmations = confirmations,
                );
                return ConfirmationStatus::Confirmed {
                    block_number,
                    confirmations,
                };
            }
            Ok(TransactionCheck {
                status: TxStatus::Failed,
                block_number: Some(block_number),
                ..
            }) => {
                log_warn!("tracker", "Transaction reverted", tx_hash = format!("{:?}", hash));
                return ConfirmationStatus::Reverted { block_number };
            }
            Ok(check) => {
                log_debug!(
                    "tracker",
                    "Waiting for confirmation",
                    tx_hash = format!("{:?}", hash),
                    attempt = attempt + 1,
                    confirmations = check.confirmations,
                    required = chain.confirmations,
                );
            }
            Err(e) => {
                log_warn!(
                    "tracker",
                    "Receipt check failed",
                    tx_hash = format!("{:?}", hash),
                    attempt = attempt + 1,
                    error = e,
                );
            }
        }

        if attempt + 1 < attempts {
            tokio::time::sleep(policy.delay_after(attempt)).await;
        }
    }

    log_warn!(
        "tracker",
        "Gave up waiting for confirmation",
        tx_hash = format!("{:?}", hash),
        attempts = attempts,
    );
    ConfirmationStatus::TimedOut
}
