//! Chain RPC
//!
//! Async JSON-RPC access to EVM nodes. [`ChainRpc`] is the seam the
//! builder, broadcaster, tracker and naming client talk to; [`HttpChainRpc`]
//! is the `reqwest` implementation.
//!
//! Failures are classified so callers can apply the retry policy:
//! - transient: the node explicitly asked us to back off (429/5xx, -32005)
//! - ambiguous: the request may or may not have been delivered (timeouts,
//!   dropped connections, unexplained 5xx)
//! - everything else is a definitive answer

pub mod http;

use async_trait::async_trait;
use ethers_core::types::{Address, H256, U256, U64};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::chains::ChainDescriptor;
use crate::error::SendError;
use crate::log_warn;

pub use http::HttpChainRpc;

/// JSON-RPC error code some providers use for rate limiting
pub const RATE_LIMIT_CODE: i64 = -32005;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl RpcError {
    /// The node explicitly signalled a temporary condition
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Http { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            RpcError::Node { code, message } => {
                let lower = message.to_lowercase();
                *code == RATE_LIMIT_CODE
                    || lower.contains("rate limit")
                    || lower.contains("too many requests")
                    || lower.contains("capacity exceeded")
            }
            _ => false,
        }
    }

    /// Delivery of the request is unknown. A 5xx that is not an explicit
    /// back-off may come from a proxy after the node already took the call.
    pub fn is_ambiguous(&self) -> bool {
        match self {
            RpcError::Timeout { .. } | RpcError::Transport(_) | RpcError::Decode(_) => true,
            RpcError::Http { status, .. } => (500..=599).contains(status) && !self.is_transient(),
            RpcError::Node { .. } => false,
        }
    }

    /// Lower-cased node message, if the node answered with one
    pub fn node_message(&self) -> Option<String> {
        match self {
            RpcError::Node { message, .. } => Some(message.to_lowercase()),
            RpcError::Http { body, .. } => Some(body.to_lowercase()),
            _ => None,
        }
    }
}

impl From<RpcError> for SendError {
    fn from(e: RpcError) -> Self {
        SendError::network(e.to_string())
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Subset of a transaction receipt the tracker needs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: H256,
    pub block_number: Option<U64>,
    /// 1 for success, 0 for revert (post-Byzantium)
    pub status: Option<U64>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.map(|s| s.as_u64() == 1).unwrap_or(true)
    }
}

// =============================================================================
// Client Trait
// =============================================================================

#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// `eth_getTransactionCount(address, "pending")`
    async fn transaction_count(&self, chain: &ChainDescriptor, address: Address) -> Result<U256, RpcError>;

    /// `eth_gasPrice`
    async fn gas_price(&self, chain: &ChainDescriptor) -> Result<U256, RpcError>;

    /// `eth_maxPriorityFeePerGas`
    async fn max_priority_fee(&self, chain: &ChainDescriptor) -> Result<U256, RpcError>;

    /// `eth_sendRawTransaction`
    async fn send_raw_transaction(&self, chain: &ChainDescriptor, raw: &[u8]) -> Result<H256, RpcError>;

    /// `eth_getTransactionReceipt`, `None` while unmined
    async fn transaction_receipt(&self, chain: &ChainDescriptor, hash: H256) -> Result<Option<TxReceipt>, RpcError>;

    /// `eth_blockNumber`
    async fn block_number(&self, chain: &ChainDescriptor) -> Result<u64, RpcError>;

    /// `eth_call` against the latest block
    async fn call(&self, chain: &ChainDescriptor, to: Address, data: &[u8]) -> Result<Vec<u8>, RpcError>;
}

/// Delay before the single retry of an idempotent read
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Run an idempotent read, retrying once on a transient or ambiguous failure
pub async fn read_with_retry<T, F, Fut>(operation: &'static str, mut read: F) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    match read().await {
        Err(e) if e.is_transient() || e.is_ambiguous() => {
            log_warn!("rpc", "Read failed, retrying once", operation = operation, error = e);
            tokio::time::sleep(READ_RETRY_DELAY).await;
            read().await
        }
        other => other,
    }
}
