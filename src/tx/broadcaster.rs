//! Transaction Broadcaster
//!
//! Submits signed transactions through `eth_sendRawTransaction` and maps
//! node answers onto the error taxonomy. A broadcast is retried once, and
//! only when the node explicitly signalled a transient condition; an
//! ambiguous failure is never blindly resubmitted.

use ethers_core::types::H256;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::envelope::SignedTransaction;
use crate::chains::ChainDescriptor;
use crate::error::{SendError, SendResult};
use crate::rpc::{ChainRpc, RpcError};
use crate::{log_info, log_warn};

/// Broadcast configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Wait before the single transient retry
    #[serde(with = "millis")]
    pub retry_delay: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(1500),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// How a node answer to a broadcast should be treated
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rejection {
    /// The node already holds this exact transaction
    AlreadyKnown,
    StaleNonce(String),
    Rejected(String),
}

fn classify_rejection(error: &RpcError) -> Option<Rejection> {
    let message = error.node_message()?;

    if message.contains("already known") || message.contains("known transaction") {
        return Some(Rejection::AlreadyKnown);
    }
    if message.contains("nonce too low")
        || message.contains("nonce has already been used")
        || message.contains("replacement transaction underpriced")
    {
        return Some(Rejection::StaleNonce(message));
    }
    Some(Rejection::Rejected(message))
}

fn rejection_error(message: &str) -> SendError {
    if message.contains("intrinsic gas too low") {
        return SendError::broadcast_rejected("Fee limit is below the intrinsic cost of the transaction")
            .with_details(message);
    }
    if message.contains("insufficient funds") {
        return SendError::broadcast_rejected("Account cannot cover value plus maximum fee")
            .with_details(message);
    }
    SendError::broadcast_rejected(format!("Node rejected the transaction: {}", message))
}

/// Broadcast a signed transaction and return its hash.
///
/// Stale nonces surface as `StaleNonce` so the caller rebuilds with a
/// fresh nonce instead of resubmitting the same bytes.
pub async fn broadcast(
    rpc: &dyn ChainRpc,
    chain: &ChainDescriptor,
    signed: &SignedTransaction,
    config: &BroadcastConfig,
) -> SendResult<H256> {
    broadcast_raw(rpc, chain, signed.raw_bytes(), signed.hash(), config).await
}

/// Broadcast already signed bytes whose hash is `expected`.
///
/// Used directly to re-send a transaction whose first broadcast had an
/// unknown outcome; the bytes, and so the nonce, never change.
pub async fn broadcast_raw(
    rpc: &dyn ChainRpc,
    chain: &ChainDescriptor,
    raw: &[u8],
    expected: H256,
    config: &BroadcastConfig,
) -> SendResult<H256> {
    let mut retried = false;

    loop {
        match rpc.send_raw_transaction(chain, raw).await {
            Ok(hash) => {
                if hash != expected {
                    log_warn!(
                        "broadcaster",
                        "Node returned a different hash than computed locally",
                        tx_hash = format!("{:?}", hash),
                        computed_hash = format!("{:?}", expected),
                    );
                }
                log_info!(
                    "broadcaster",
                    "Transaction broadcast",
                    chain = chain.key,
                    tx_hash = format!("{:?}", hash),
                );
                return Ok(hash);
            }
            Err(e) if e.is_transient() && !retried => {
                log_warn!("broadcaster", "Node asked to back off, retrying once", error = e);
                retried = true;
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(e) if e.is_ambiguous() => {
                return Err(SendError::network(format!(
                    "Broadcast outcome unknown, check {:?} before resending",
                    expected
                ))
                .with_details(e.to_string()));
            }
            Err(e) => {
                return match classify_rejection(&e) {
                    Some(Rejection::AlreadyKnown) => {
                        log_info!(
                            "broadcaster",
                            "Node already has the transaction",
                            tx_hash = format!("{:?}", expected),
                        );
                        Ok(expected)
                    }
                    Some(Rejection::StaleNonce(message)) => Err(SendError::stale_nonce(format!(
                        "Nonce of {:?} is no longer valid, rebuild the transaction",
                        expected
                    ))
                    .with_details(message)),
                    Some(Rejection::Rejected(message)) => {
                        if e.is_transient() {
                            Err(SendError::network("Node is rate limiting broadcasts")
                                .with_details(message))
                        } else {
                            Err(rejection_error(&message))
                        }
                    }
                    None => Err(e.into()),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(message: &str) -> RpcError {
        RpcError::Node {
            code: -32000,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_classify_rejection() {
        assert_eq!(classify_rejection(&node("already known")), Some(Rejection::AlreadyKnown));
        assert!(matches!(
            classify_rejection(&node("nonce too low: next nonce 5, tx nonce 4")),
            Some(Rejection::StaleNonce(_))
        ));
        assert!(matches!(
            classify_rejection(&node("replacement transaction underpriced")),
            Some(Rejection::StaleNonce(_))
        ));
        assert!(matches!(
            classify_rejection(&node("insufficient funds for gas * price + value")),
            Some(Rejection::Rejected(_))
        ));
        assert_eq!(classify_rejection(&RpcError::Transport("reset".into())), None);
    }

    #[test]
    fn test_rejection_messages() {
        let err = rejection_error("intrinsic gas too low");
        assert_eq!(err.code, crate::error::ErrorCode::BroadcastRejected);
        assert!(err.message.contains("intrinsic"));
    }

    #[test]
    fn test_config_serde_millis() {
        let config: BroadcastConfig = serde_json::from_str(r#"{"retry_delay": 20}"#).unwrap();
        assert_eq!(config.retry_delay, Duration::from_millis(20));
        let empty: BroadcastConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, BroadcastConfig::default());
    }
}
