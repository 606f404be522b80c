//! Bridge Orchestrator
//!
//! Two-phase transfer: register an intent with the off-chain service under
//! an idempotency key, then run the on-chain leg through the send pipeline
//! and poll the intent until it settles.
//!
//! The ledger keeps one entry per idempotency key. An entry's leg moves
//! `NotAttempted -> InFlight -> Unknown -> Broadcast`, or to `Failed` when
//! nothing reached the chain. Only `NotAttempted` and `Failed` legs are
//! built and signed, so at most one transaction exists per intent. An
//! `Unknown` leg is settled by hash and, when the chain has never seen it,
//! by re-sending the same signed bytes.
//!
//! With an [`IntentLedger`] attached, the leg is written as `Unknown`
//! before it is broadcast, and a failed write stops the broadcast.

use chrono::{DateTime, Utc};
use ethers_core::types::H256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::idempotency::{idempotency_key, time_bucket, DEFAULT_BUCKET_SECS};
use super::intent_service::{service_chain_code, CreateTransfer, IntentService, IntentServiceError, RemoteTransfer};
use super::ledger::{IntentLedger, LedgerRecord};
use super::types::{BridgeOutcome, BridgeRequest, IntentStatus, OnChainLeg, TransferIntent};
use crate::error::{ErrorCode, SendError, SendResult};
use crate::pipeline::{validate_request, SendPipeline, TransferRequest};
use crate::tx::{fees, TxStatus};
use crate::types::ConfirmationStatus;
use crate::utils::BackoffPolicy;
use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Width of the idempotency time bucket
    pub bucket_secs: u64,
    /// Currency reported to the intent service
    pub currency: String,
    /// Budget for status polling after the on-chain leg
    pub poll: BackoffPolicy,
    /// Wait for the on-chain leg to confirm before polling the intent
    pub wait_for_confirmation: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            bucket_secs: DEFAULT_BUCKET_SECS,
            currency: "USD".to_string(),
            poll: BackoffPolicy::new(
                10,
                std::time::Duration::from_secs(3),
                std::time::Duration::from_secs(30),
                1.5,
            ),
            wait_for_confirmation: true,
        }
    }
}

pub struct BridgeOrchestrator<'s> {
    pipeline: SendPipeline<'s>,
    service: Arc<dyn IntentService>,
    settings: BridgeSettings,
    ledger: Mutex<HashMap<Uuid, LedgerRecord>>,
    store: Option<IntentLedger>,
    /// Serializes snapshot-and-write so the file never goes backwards
    store_lock: tokio::sync::Mutex<()>,
}

impl<'s> BridgeOrchestrator<'s> {
    pub fn new(pipeline: SendPipeline<'s>, service: Arc<dyn IntentService>, settings: BridgeSettings) -> Self {
        Self {
            pipeline,
            service,
            settings,
            ledger: Mutex::new(HashMap::new()),
            store: None,
            store_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load and keep writing a persisted ledger
    pub async fn with_ledger(mut self, store: IntentLedger) -> SendResult<Self> {
        let records = store.load().await?;
        log_info!(
            "bridge",
            "Loaded intent ledger",
            path = store.path().display(),
            intents = records.len(),
        );
        {
            let mut ledger = self.ledger();
            for record in records {
                ledger.insert(record.intent.intent_id, record);
            }
        }
        self.store = Some(store);
        Ok(self)
    }

    pub fn pipeline(&self) -> &SendPipeline<'s> {
        &self.pipeline
    }

    fn ledger(&self) -> MutexGuard<'_, HashMap<Uuid, LedgerRecord>> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of one recorded intent
    pub fn intent(&self, intent_id: Uuid) -> Option<TransferIntent> {
        self.ledger().get(&intent_id).map(|entry| entry.intent.clone())
    }

    /// Snapshot of every recorded intent, oldest first
    pub fn intents(&self) -> Vec<TransferIntent> {
        let mut intents: Vec<_> = self.ledger().values().map(|entry| entry.intent.clone()).collect();
        intents.sort_by_key(|intent| intent.created_at);
        intents
    }

    pub async fn submit(&self, request: &BridgeRequest) -> SendResult<BridgeOutcome> {
        self.submit_at(request, Utc::now()).await
    }

    /// Submit with an explicit clock, which selects the idempotency bucket
    pub async fn submit_at(&self, request: &BridgeRequest, now: DateTime<Utc>) -> SendResult<BridgeOutcome> {
        let source_wallet = request.source_wallet.trim();
        if source_wallet.is_empty() {
            return Err(SendError::intent_service("Source wallet reference is empty"));
        }

        let transfer = TransferRequest {
            chain_id: request.chain_id,
            recipient: request.recipient.clone(),
            amount: request.amount.clone(),
            fee_per_unit: request.fee_per_unit.clone(),
            fee_unit: request.fee_unit,
            fee_limit: request.fee_limit,
            wait: self.settings.wait_for_confirmation,
        };
        let descriptor = self.pipeline.registry().get(request.chain_id)?;
        let amounts = validate_request(descriptor, &transfer, self.pipeline.settings().default_fee_limit)?;
        let amount = fees::normalize_decimal(&request.amount, descriptor.decimals)?;
        let chain_code = service_chain_code(&descriptor.key);
        self.pipeline.session_account()?;

        let plan = self.pipeline.resolve_plan(&transfer, amounts).await?;
        let bucket = time_bucket(now, self.settings.bucket_secs);
        let intent_id = idempotency_key(source_wallet, plan.chain_id, plan.to.address_bytes(), &amount, bucket);

        {
            let mut ledger = self.ledger();
            if let Some(entry) = ledger.get(&intent_id) {
                log_info!("bridge", "Duplicate transfer request", intent_id = intent_id);
                return Ok(BridgeOutcome {
                    intent: entry.intent.clone(),
                    duplicate: true,
                    leg_error: None,
                });
            }
            let intent = TransferIntent {
                intent_id,
                remote_id: None,
                source_wallet: source_wallet.to_string(),
                destination_chain: plan.chain_id,
                destination: plan.to.clone(),
                amount: amount.clone(),
                currency: self.settings.currency.clone(),
                status: IntentStatus::Pending,
                leg: OnChainLeg::NotAttempted,
                created_at: now,
            };
            ledger.insert(intent_id, LedgerRecord { intent, plan: plan.clone() });
        }

        let body = CreateTransfer::new(
            intent_id,
            source_wallet,
            plan.to.display_form(),
            &chain_code,
            &amount,
            &self.settings.currency,
        );
        let remote = match self.create_with_retry(&body).await {
            Ok(remote) => remote,
            Err(e) => {
                self.ledger().remove(&intent_id);
                log_warn!("bridge", "Intent registration failed", intent_id = intent_id, error = e);
                return Err(e.into());
            }
        };

        log_info!(
            "bridge",
            "Intent registered",
            intent_id = intent_id,
            remote_id = remote.id,
            chain = descriptor.key,
        );
        self.update(intent_id, |intent| {
            intent.remote_id = Some(remote.id.clone());
            intent.status = IntentStatus::from_service(&remote.status);
        });
        self.persist().await?;

        self.run_leg(intent_id).await
    }

    /// Re-run the on-chain leg of an intent.
    ///
    /// A leg that failed or never ran is built and signed afresh. A leg
    /// with an unknown broadcast is looked up by hash and, if the chain has
    /// no receipt, the same signed bytes are sent again.
    pub async fn retry_onchain(&self, intent_id: Uuid) -> SendResult<BridgeOutcome> {
        let leg = self.intent(intent_id).ok_or_else(|| not_found(intent_id))?.leg;
        match leg {
            OnChainLeg::NotAttempted | OnChainLeg::Failed { .. } => {
                self.pipeline.session_account()?;
                self.run_leg(intent_id).await
            }
            OnChainLeg::Unknown { tx_hash, raw } => self.settle_unknown(intent_id, tx_hash, &raw).await,
            OnChainLeg::InFlight | OnChainLeg::Broadcast { .. } => Err(SendError::new(
                ErrorCode::IntentAlreadyBroadcast,
                format!("On-chain leg of intent {} was already attempted", intent_id),
            )),
        }
    }

    /// Poll the service for a recorded intent until it is terminal or the
    /// budget runs out; returns the last known state
    pub async fn poll_intent(&self, intent_id: Uuid) -> SendResult<TransferIntent> {
        let remote_id = self.intent(intent_id).ok_or_else(|| not_found(intent_id))?.remote_id;
        if let Some(remote_id) = remote_id {
            self.poll_status(intent_id, &remote_id).await;
        }
        self.intent(intent_id).ok_or_else(|| not_found(intent_id))
    }

    async fn run_leg(&self, intent_id: Uuid) -> SendResult<BridgeOutcome> {
        let plan = {
            let mut ledger = self.ledger();
            let entry = ledger.get_mut(&intent_id).ok_or_else(|| not_found(intent_id))?;
            if !entry.intent.leg.can_attempt() {
                return Err(SendError::new(
                    ErrorCode::IntentAlreadyBroadcast,
                    format!("On-chain leg of intent {} is already in flight", intent_id),
                ));
            }
            entry.intent.leg = OnChainLeg::InFlight;
            entry.plan.clone()
        };

        let signed = match self.pipeline.prepare(&plan).await {
            Ok(signed) => signed,
            Err(e) => return self.leg_failed(intent_id, e).await,
        };

        self.update(intent_id, |intent| {
            intent.leg = OnChainLeg::Unknown {
                tx_hash: signed.hash(),
                raw: signed.raw_bytes().to_vec(),
            }
        });
        if let Err(e) = self.persist().await {
            // not durable, so not sent
            return self.leg_failed(intent_id, e).await;
        }

        match self.pipeline.submit(&plan, &signed).await {
            Ok(outcome) => self.leg_broadcast(intent_id, outcome.tx_hash, outcome.status).await,
            Err(e) if e.code == ErrorCode::NetworkError => {
                log_warn!(
                    "bridge",
                    "Broadcast outcome unknown; retry settles it by hash",
                    intent_id = intent_id,
                    tx_hash = format!("{:?}", signed.hash()),
                    error = e,
                );
                self.leg_outcome(intent_id, Some(e))
            }
            Err(e) => self.leg_failed(intent_id, e).await,
        }
    }

    async fn settle_unknown(&self, intent_id: Uuid, tx_hash: H256, raw: &[u8]) -> SendResult<BridgeOutcome> {
        let plan = self
            .ledger()
            .get(&intent_id)
            .map(|entry| entry.plan.clone())
            .ok_or_else(|| not_found(intent_id))?;

        let check = match self.pipeline.check(plan.chain_id, tx_hash).await {
            Ok(check) => check,
            Err(e) => return self.leg_outcome(intent_id, Some(e)),
        };
        if check.status == TxStatus::Pending {
            log_info!(
                "bridge",
                "No receipt for the earlier broadcast, sending the same transaction again",
                intent_id = intent_id,
                tx_hash = format!("{:?}", tx_hash),
            );
            if let Err(e) = self.pipeline.resend(plan.chain_id, raw, tx_hash).await {
                log_warn!("bridge", "Re-send failed; leg stays unknown", intent_id = intent_id, error = e);
                return self.leg_outcome(intent_id, Some(e));
            }
        }

        let status = self.pipeline.confirm(plan.chain_id, tx_hash, plan.wait).await?;
        self.leg_broadcast(intent_id, tx_hash, status).await
    }

    async fn leg_failed(&self, intent_id: Uuid, error: SendError) -> SendResult<BridgeOutcome> {
        log_warn!(
            "bridge",
            "On-chain leg failed; intent stays pending",
            intent_id = intent_id,
            error = error,
        );
        self.update(intent_id, |intent| intent.leg = OnChainLeg::failed(&error));
        self.persist_or_warn().await;
        self.leg_outcome(intent_id, Some(error))
    }

    async fn leg_broadcast(&self, intent_id: Uuid, tx_hash: H256, status: ConfirmationStatus) -> SendResult<BridgeOutcome> {
        self.update(intent_id, |intent| intent.leg = OnChainLeg::Broadcast { tx_hash, status });
        self.persist_or_warn().await;

        let remote_id = self.intent(intent_id).and_then(|intent| intent.remote_id);
        if let Some(remote_id) = remote_id {
            self.poll_status(intent_id, &remote_id).await;
        }
        self.leg_outcome(intent_id, None)
    }

    fn leg_outcome(&self, intent_id: Uuid, leg_error: Option<SendError>) -> SendResult<BridgeOutcome> {
        let intent = self.intent(intent_id).ok_or_else(|| not_found(intent_id))?;
        Ok(BridgeOutcome {
            intent,
            duplicate: false,
            leg_error,
        })
    }

    async fn create_with_retry(&self, body: &CreateTransfer) -> Result<RemoteTransfer, IntentServiceError> {
        match self.service.create_transfer(body).await {
            Err(e) if e.is_retryable() => {
                log_warn!("bridge", "Retrying intent registration", error = e);
                tokio::time::sleep(self.settings.poll.delay_after(0)).await;
                self.service.create_transfer(body).await
            }
            other => other,
        }
    }

    async fn poll_status(&self, intent_id: Uuid, remote_id: &str) {
        let policy = self.settings.poll;
        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(policy.delay_after(attempt - 1)).await;
            }
            match self.service.get_transfer(remote_id).await {
                Ok(remote) => {
                    let status = IntentStatus::from_service(&remote.status);
                    self.update(intent_id, |intent| intent.status = status);
                    if status.is_terminal() {
                        log_info!("bridge", "Intent reached a final status", intent_id = intent_id, status = remote.status);
                        break;
                    }
                }
                Err(e) => {
                    log_warn!("bridge", "Intent status check failed", intent_id = intent_id, attempt = attempt, error = e);
                }
            }
        }
        self.persist_or_warn().await;
    }

    /// Write the whole ledger when one is attached
    async fn persist(&self) -> SendResult<()> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(()),
        };
        let _writing = self.store_lock.lock().await;
        let mut records: Vec<_> = self.ledger().values().cloned().collect();
        records.sort_by_key(|record| record.intent.created_at);
        store.store(&records).await
    }

    /// Persist a state the stored one is already a safe view of
    async fn persist_or_warn(&self) {
        if let Err(e) = self.persist().await {
            log_warn!("bridge", "Could not write intent ledger", error = e);
        }
    }

    fn update(&self, intent_id: Uuid, apply: impl FnOnce(&mut TransferIntent)) {
        if let Some(entry) = self.ledger().get_mut(&intent_id) {
            apply(&mut entry.intent);
        }
    }
}

fn not_found(intent_id: Uuid) -> SendError {
    SendError::new(ErrorCode::IntentNotFound, format!("No intent {} in the ledger", intent_id))
}
