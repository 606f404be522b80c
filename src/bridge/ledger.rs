//! Intent ledger persisted between runs.
//!
//! One JSON file holds every recorded intent together with the plan its
//! on-chain leg is built from. The orchestrator writes a leg as
//! [`OnChainLeg::Unknown`], signed bytes included, before broadcasting it,
//! so a later run can always tell whether a broadcast may have happened.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::types::{OnChainLeg, TransferIntent};
use crate::error::{SendError, SendResult};
use crate::log_warn;
use crate::pipeline::TransferPlan;

/// One intent and the transfer behind its on-chain leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub intent: TransferIntent,
    pub plan: TransferPlan,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    intents: Vec<LedgerRecord>,
}

#[derive(Debug, Clone)]
pub struct IntentLedger {
    path: PathBuf,
}

impl IntentLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored record; empty when the file does not exist.
    ///
    /// An unreadable ledger is an error: forgetting an intent would let its
    /// leg run a second time.
    pub async fn load(&self) -> SendResult<Vec<LedgerRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let file: LedgerFile = serde_json::from_str(&contents).map_err(|e| {
            SendError::internal(format!("Intent ledger {} is unreadable", self.path.display()))
                .with_details(e.to_string())
        })?;

        Ok(file
            .intents
            .into_iter()
            .map(|mut record| {
                // legs are written as Unknown before any broadcast, so a
                // stored InFlight leg never reached the chain
                if record.intent.leg == OnChainLeg::InFlight {
                    log_warn!(
                        "intent_ledger",
                        "Leg was interrupted before broadcast",
                        intent_id = record.intent.intent_id,
                    );
                    record.intent.leg = OnChainLeg::interrupted();
                }
                record
            })
            .collect())
    }

    /// Replace the stored records. Written to a sibling file first and
    /// renamed into place.
    pub async fn store(&self, records: &[LedgerRecord]) -> SendResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&LedgerFile {
            intents: records.to_vec(),
        })?;

        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| SendError::internal(format!("Cannot write {}: {}", staging.display(), e)))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| SendError::internal(format!("Cannot replace {}: {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::types::IntentStatus;
    use crate::error::ErrorCode;
    use crate::types::{AddressSource, ResolvedAddress};
    use chrono::{TimeZone, Utc};
    use ethers_core::types::{H256, U256};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn record(leg: OnChainLeg) -> LedgerRecord {
        let to = ResolvedAddress::new(84532, vec![0xab; 20], "0xabab".to_string(), AddressSource::Native);
        LedgerRecord {
            intent: TransferIntent {
                intent_id: Uuid::from_u128(7),
                remote_id: Some("remote-7".to_string()),
                source_wallet: "wallet-1".to_string(),
                destination_chain: 84532,
                destination: to.clone(),
                amount: "1.5".to_string(),
                currency: "USD".to_string(),
                status: IntentStatus::Pending,
                leg,
                created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            },
            plan: TransferPlan {
                chain_id: 84532,
                to,
                value: U256::from(1_500_000_000_000_000_000u64),
                fee_per_unit: None,
                fee_limit: 21_000,
                wait: true,
            },
        }
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let dir = TempDir::new().unwrap();
        let ledger = IntentLedger::new(dir.path().join("nested").join("intents.json"));
        assert!(ledger.load().await.unwrap().is_empty());

        let unknown = record(OnChainLeg::Unknown {
            tx_hash: H256::repeat_byte(0x11),
            raw: vec![0x02, 0xf8, 0x6b],
        });
        ledger.store(&[unknown.clone()]).await.unwrap();
        assert_eq!(ledger.load().await.unwrap(), vec![unknown]);
        assert!(!dir.path().join("nested").join("intents.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_interrupted_leg_loads_as_failed() {
        let dir = TempDir::new().unwrap();
        let ledger = IntentLedger::new(dir.path().join("intents.json"));
        ledger.store(&[record(OnChainLeg::InFlight)]).await.unwrap();

        let loaded = ledger.load().await.unwrap();
        assert!(matches!(
            loaded[0].intent.leg,
            OnChainLeg::Failed {
                code: ErrorCode::Internal,
                ..
            }
        ));
        assert!(loaded[0].intent.leg.can_attempt());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("intents.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let err = IntentLedger::new(path).load().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }
}
