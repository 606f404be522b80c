//! Bridge types and data structures

use chrono::{DateTime, Utc};
use ethers_core::types::H256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, SendError};
use crate::types::{ChainId, ConfirmationStatus, FeeUnit, ResolvedAddress};

/// Off-chain transfer status, driven only by the intent service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Pending,
    Settled,
    Failed,
}

impl IntentStatus {
    /// Map a service status string; unknown values are still in progress
    pub fn from_service(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "complete" | "completed" | "settled" => IntentStatus::Settled,
            "failed" => IntentStatus::Failed,
            _ => IntentStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntentStatus::Pending)
    }
}

/// What happened to the on-chain half of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OnChainLeg {
    NotAttempted,
    /// Signing is running right now
    InFlight,
    /// Nothing reached the chain; the leg may be rebuilt and signed again
    Failed { code: ErrorCode, message: String },
    /// Signed and handed to the node, outcome not known. Only these exact
    /// bytes may ever be sent for this intent.
    Unknown {
        tx_hash: H256,
        #[serde(with = "crate::serde_bytes::hex_vec")]
        raw: Vec<u8>,
    },
    Broadcast { tx_hash: H256, status: ConfirmationStatus },
}

impl OnChainLeg {
    pub fn failed(error: &SendError) -> Self {
        OnChainLeg::Failed {
            code: error.code,
            message: error.message.clone(),
        }
    }

    pub(crate) fn interrupted() -> Self {
        OnChainLeg::Failed {
            code: ErrorCode::Internal,
            message: "Interrupted before broadcast".to_string(),
        }
    }

    /// The leg may be built and signed (again)
    pub fn can_attempt(&self) -> bool {
        matches!(self, OnChainLeg::NotAttempted | OnChainLeg::Failed { .. })
    }

    /// `retry_onchain` has something to do: sign afresh, or settle an
    /// unknown broadcast by hash
    pub fn is_retryable(&self) -> bool {
        self.can_attempt() || matches!(self, OnChainLeg::Unknown { .. })
    }

    /// Hash of the transaction sent, or possibly sent, for this leg
    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            OnChainLeg::Unknown { tx_hash, .. } | OnChainLeg::Broadcast { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

/// One logical bridge transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    /// Idempotency key, also the local handle
    pub intent_id: Uuid,
    /// Id assigned by the intent service once registered
    pub remote_id: Option<String>,
    pub source_wallet: String,
    pub destination_chain: ChainId,
    pub destination: ResolvedAddress,
    /// Canonical decimal amount
    pub amount: String,
    pub currency: String,
    pub status: IntentStatus,
    pub leg: OnChainLeg,
    pub created_at: DateTime<Utc>,
}

/// A bridge transfer as the user expressed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequest {
    /// Wallet reference at the intent service
    pub source_wallet: String,
    pub chain_id: ChainId,
    /// Name or native address on `chain_id`
    pub recipient: String,
    pub amount: String,
    pub fee_per_unit: Option<String>,
    pub fee_unit: FeeUnit,
    pub fee_limit: Option<u64>,
}

impl BridgeRequest {
    pub fn new(
        source_wallet: impl Into<String>,
        chain_id: ChainId,
        recipient: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            source_wallet: source_wallet.into(),
            chain_id,
            recipient: recipient.into(),
            amount: amount.into(),
            fee_per_unit: None,
            fee_unit: FeeUnit::Gwei,
            fee_limit: None,
        }
    }
}

/// Result of submitting or retrying a bridge transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeOutcome {
    pub intent: TransferIntent,
    /// The request matched an intent already recorded in this bucket
    pub duplicate: bool,
    /// Why the on-chain leg failed, when it did
    pub leg_error: Option<SendError>,
}
