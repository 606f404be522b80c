//! Bridge transfers: intent registration, the on-chain leg and settlement.

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{timeout, unavailable, Behavior, FakeIntents, Harness, ALICE};
use hwsend::bridge::{
    BridgeOrchestrator, BridgeRequest, BridgeSettings, IntentLedger, IntentServiceError, IntentStatus, OnChainLeg,
};
use hwsend::chains::BASE_SEPOLIA;
use hwsend::rpc::RpcError;
use hwsend::tx::decode_signed;
use hwsend::utils::BackoffPolicy;
use hwsend::{to_checksum_address, ConfirmationStatus, ErrorCode, SignerSession};

fn settings(poll_attempts: u32) -> BridgeSettings {
    BridgeSettings {
        bucket_secs: 300,
        poll: BackoffPolicy::immediate(poll_attempts),
        ..BridgeSettings::default()
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn request(amount: &str) -> BridgeRequest {
    BridgeRequest::new("wallet-1000", BASE_SEPOLIA, "alice.eth", amount)
}

fn bridge<'s>(h: &Harness, session: &'s SignerSession, intents: &Arc<FakeIntents>) -> BridgeOrchestrator<'s> {
    BridgeOrchestrator::new(h.pipeline(session), intents.clone(), settings(3))
}

#[tokio::test]
async fn test_submit_registers_intent_and_broadcasts() {
    let h = Harness::new();
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::with_statuses(&["pending", "complete"]));
    let bridge = bridge(&h, &session, &intents);

    let outcome = bridge.submit_at(&request("1.50"), t0()).await.unwrap();

    assert!(!outcome.duplicate);
    assert!(outcome.leg_error.is_none());
    let intent = outcome.intent;
    assert_eq!(intent.status, IntentStatus::Settled);
    assert_eq!(intent.amount, "1.5");
    assert_eq!(intent.remote_id, Some(format!("remote-{}", intent.intent_id)));
    match &intent.leg {
        OnChainLeg::Broadcast { status, .. } => assert!(matches!(status, ConfirmationStatus::Confirmed { .. })),
        other => panic!("unexpected leg {:?}", other),
    }

    let created = intents.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].idempotency_key, intent.intent_id);
    assert_eq!(created[0].source.id, "wallet-1000");
    assert_eq!(created[0].destination.chain, "BASE");
    assert_eq!(created[0].destination.address, to_checksum_address(&ALICE));
    assert_eq!(created[0].amount.amount, "1.5");

    let sent = h.rpc.sent();
    assert_eq!(sent.len(), 1);
    let decoded = decode_signed(&sent[0]).unwrap();
    assert_eq!(decoded.to, Some(ALICE.into()));
}

#[tokio::test]
async fn test_same_request_in_bucket_is_deduplicated() {
    let h = Harness::new();
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());
    let bridge = bridge(&h, &session, &intents);

    let first = bridge.submit_at(&request("1.5"), t0()).await.unwrap();
    // same destination spelled as an address, same amount spelled differently
    let mut again = request("1.500");
    again.recipient = "0xabcd000000000000000000000000000000001234".to_string();
    let second = bridge
        .submit_at(&again, t0() + Duration::seconds(90))
        .await
        .unwrap();

    assert!(second.duplicate);
    assert_eq!(second.intent.intent_id, first.intent.intent_id);
    assert_eq!(intents.creates(), 1);
    assert_eq!(h.rpc.sent().len(), 1);
    assert_eq!(h.device.signs(), 1);
    assert_eq!(bridge.intents().len(), 1);
}

#[tokio::test]
async fn test_next_bucket_is_a_new_intent() {
    let h = Harness::new();
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());
    let bridge = bridge(&h, &session, &intents);

    let first = bridge.submit_at(&request("1"), t0()).await.unwrap();
    let later = bridge
        .submit_at(&request("1"), t0() + Duration::seconds(600))
        .await
        .unwrap();

    assert!(!later.duplicate);
    assert_ne!(later.intent.intent_id, first.intent.intent_id);
    assert_eq!(intents.creates(), 2);
    assert_eq!(h.rpc.sent().len(), 2);
    assert_eq!(bridge.intents().len(), 2);
}

#[tokio::test]
async fn test_failed_leg_can_be_retried_once_broadcast() {
    let h = Harness::new();
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());
    let bridge = bridge(&h, &session, &intents);

    h.device.set(Behavior::Reject);
    let outcome = bridge.submit_at(&request("2"), t0()).await.unwrap();
    let intent_id = outcome.intent.intent_id;
    assert_eq!(outcome.leg_error.as_ref().map(|e| e.code), Some(ErrorCode::UserRejected));
    assert_eq!(outcome.intent.status, IntentStatus::Pending);
    assert!(matches!(
        outcome.intent.leg,
        OnChainLeg::Failed {
            code: ErrorCode::UserRejected,
            ..
        }
    ));
    assert!(h.rpc.sent().is_empty());
    assert_eq!(intents.status_calls.load(Ordering::SeqCst), 0);

    // resubmitting returns the recorded intent without running the leg
    let duplicate = bridge.submit_at(&request("2"), t0()).await.unwrap();
    assert!(duplicate.duplicate);
    assert_eq!(h.device.signs(), 1);

    h.device.set(Behavior::Approve);
    let retried = bridge.retry_onchain(intent_id).await.unwrap();
    assert!(retried.leg_error.is_none());
    assert!(matches!(retried.intent.leg, OnChainLeg::Broadcast { .. }));
    assert_eq!(h.rpc.sent().len(), 1);

    let err = bridge.retry_onchain(intent_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::IntentAlreadyBroadcast);
    assert_eq!(h.rpc.sent().len(), 1);
    assert_eq!(intents.creates(), 1);
}

#[tokio::test]
async fn test_create_rejection_leaves_no_intent() {
    let h = Harness::new();
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());
    intents.create_failures.lock().unwrap().push_back(IntentServiceError::Http {
        status: 400,
        body: "invalid wallet".into(),
    });
    let bridge = bridge(&h, &session, &intents);

    let err = bridge.submit_at(&request("1"), t0()).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::IntentServiceError);
    assert_eq!(intents.creates(), 1);
    assert!(bridge.intents().is_empty());
    assert_eq!(h.device.signs(), 0);

    // the key is free again
    let outcome = bridge.submit_at(&request("1"), t0()).await.unwrap();
    assert!(!outcome.duplicate);
    assert_eq!(intents.creates(), 2);
}

#[tokio::test]
async fn test_unavailable_service_retried_with_same_key() {
    let h = Harness::new();
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());
    intents.create_failures.lock().unwrap().push_back(IntentServiceError::Http {
        status: 503,
        body: String::new(),
    });
    let bridge = bridge(&h, &session, &intents);

    let outcome = bridge.submit_at(&request("1"), t0()).await.unwrap();

    assert_eq!(intents.creates(), 2);
    let created = intents.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].idempotency_key, outcome.intent.intent_id);
    assert_eq!(h.rpc.sent().len(), 1);
}

#[tokio::test]
async fn test_poll_budget_exhausted_stays_pending() {
    let h = Harness::new();
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());
    let bridge = bridge(&h, &session, &intents);

    let outcome = bridge.submit_at(&request("1"), t0()).await.unwrap();
    assert_eq!(outcome.intent.status, IntentStatus::Pending);
    assert_eq!(intents.status_calls.load(Ordering::SeqCst), 3);

    intents.statuses.lock().unwrap().push_back("failed".to_string());
    let polled = bridge.poll_intent(outcome.intent.intent_id).await.unwrap();
    assert_eq!(polled.status, IntentStatus::Failed);
}

#[tokio::test]
async fn test_leg_broadcast_failure_keeps_intent_retryable() {
    let h = Harness::new();
    h.rpc.fail_next_broadcast(common::node_error("nonce too low"));
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());
    let bridge = bridge(&h, &session, &intents);

    let outcome = bridge.submit_at(&request("1"), t0()).await.unwrap();
    assert_eq!(outcome.leg_error.map(|e| e.code), Some(ErrorCode::StaleNonce));
    assert!(outcome.intent.leg.can_attempt());

    let retried = bridge.retry_onchain(outcome.intent.intent_id).await.unwrap();
    assert!(matches!(retried.intent.leg, OnChainLeg::Broadcast { .. }));
    assert_eq!(h.rpc.attempts(), 2);
}

#[tokio::test]
async fn test_transient_broadcast_inside_leg_is_retried() {
    let h = Harness::new();
    h.rpc.fail_next_broadcast(unavailable());
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());
    let bridge = bridge(&h, &session, &intents);

    let outcome = bridge.submit_at(&request("1"), t0()).await.unwrap();
    assert!(outcome.leg_error.is_none());
    assert_eq!(h.rpc.attempts(), 2);
    assert_eq!(h.rpc.sent().len(), 1);
}

fn unknown_leg(leg: &OnChainLeg) -> (ethers_core::types::H256, Vec<u8>) {
    match leg {
        OnChainLeg::Unknown { tx_hash, raw } => (*tx_hash, raw.clone()),
        other => panic!("expected an unknown broadcast, got {:?}", other),
    }
}

#[tokio::test]
async fn test_lost_broadcast_reply_is_settled_by_hash() {
    let h = Harness::new();
    // the node took the transaction but the answer never arrived
    h.rpc.lose_next_reply(timeout());
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::with_statuses(&["complete"]));
    let bridge = bridge(&h, &session, &intents);

    let outcome = bridge.submit_at(&request("1"), t0()).await.unwrap();
    assert_eq!(outcome.leg_error.as_ref().map(|e| e.code), Some(ErrorCode::NetworkError));
    let (tx_hash, _) = unknown_leg(&outcome.intent.leg);
    assert!(!outcome.intent.leg.can_attempt());
    assert_eq!(intents.status_calls.load(Ordering::SeqCst), 0);

    let retried = bridge.retry_onchain(outcome.intent.intent_id).await.unwrap();
    assert!(retried.leg_error.is_none());
    match retried.intent.leg {
        OnChainLeg::Broadcast { tx_hash: settled, status } => {
            assert_eq!(settled, tx_hash);
            assert!(matches!(status, ConfirmationStatus::Confirmed { .. }));
        }
        other => panic!("unexpected leg {:?}", other),
    }
    assert_eq!(retried.intent.status, IntentStatus::Settled);
    assert_eq!(h.rpc.attempts(), 1);
    assert_eq!(h.rpc.sent().len(), 1);
    assert_eq!(h.device.signs(), 1);
}

#[tokio::test]
async fn test_undelivered_broadcast_resends_same_bytes() {
    let h = Harness::new();
    h.rpc.fail_next_broadcast(timeout());
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());
    let bridge = bridge(&h, &session, &intents);

    let outcome = bridge.submit_at(&request("1"), t0()).await.unwrap();
    let (tx_hash, raw) = unknown_leg(&outcome.intent.leg);
    assert!(h.rpc.sent().is_empty());

    let retried = bridge.retry_onchain(outcome.intent.intent_id).await.unwrap();
    assert!(retried.leg_error.is_none());
    assert_eq!(retried.intent.leg.tx_hash(), Some(tx_hash));

    let sent = h.rpc.sent();
    assert_eq!(sent, vec![raw]);
    assert_eq!(decode_signed(&sent[0]).unwrap().hash, tx_hash);
    assert_eq!(h.rpc.attempts(), 2);
    assert_eq!(h.device.signs(), 1);

    let err = bridge.retry_onchain(outcome.intent.intent_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::IntentAlreadyBroadcast);
    assert_eq!(h.rpc.attempts(), 2);
}

#[tokio::test]
async fn test_proxy_error_on_leg_is_not_rebuilt() {
    let h = Harness::new();
    h.rpc.fail_next_broadcast(RpcError::Http {
        endpoint: "rpc.test".into(),
        status: 500,
        body: "internal server error".into(),
    });
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());
    let bridge = bridge(&h, &session, &intents);

    let outcome = bridge.submit_at(&request("1"), t0()).await.unwrap();
    assert_eq!(outcome.leg_error.as_ref().map(|e| e.code), Some(ErrorCode::NetworkError));
    let (tx_hash, _) = unknown_leg(&outcome.intent.leg);
    assert_eq!(h.rpc.attempts(), 1);

    let retried = bridge.retry_onchain(outcome.intent.intent_id).await.unwrap();
    assert_eq!(retried.intent.leg.tx_hash(), Some(tx_hash));
    assert_eq!(h.device.signs(), 1);
}

#[tokio::test]
async fn test_persisted_ledger_deduplicates_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intents.json");
    let h = Harness::new();
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());

    let first = bridge(&h, &session, &intents)
        .with_ledger(IntentLedger::new(&path))
        .await
        .unwrap();
    let outcome = first.submit_at(&request("1"), t0()).await.unwrap();
    assert!(matches!(outcome.intent.leg, OnChainLeg::Broadcast { .. }));
    drop(first);

    // a fresh process sees what the first one did
    let second = bridge(&h, &session, &intents)
        .with_ledger(IntentLedger::new(&path))
        .await
        .unwrap();
    assert_eq!(second.intents(), vec![outcome.intent.clone()]);

    let again = second
        .submit_at(&request("1.0"), t0() + Duration::seconds(30))
        .await
        .unwrap();
    assert!(again.duplicate);
    assert_eq!(again.intent.intent_id, outcome.intent.intent_id);

    let err = second.retry_onchain(outcome.intent.intent_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::IntentAlreadyBroadcast);

    assert_eq!(intents.creates(), 1);
    assert_eq!(h.rpc.sent().len(), 1);
    assert_eq!(h.device.signs(), 1);
}

#[tokio::test]
async fn test_unknown_leg_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intents.json");
    let h = Harness::new();
    h.rpc.fail_next_broadcast(timeout());
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());

    let first = bridge(&h, &session, &intents)
        .with_ledger(IntentLedger::new(&path))
        .await
        .unwrap();
    let outcome = first.submit_at(&request("1"), t0()).await.unwrap();
    let (tx_hash, raw) = unknown_leg(&outcome.intent.leg);
    drop(first);

    let second = bridge(&h, &session, &intents)
        .with_ledger(IntentLedger::new(&path))
        .await
        .unwrap();
    let stored = second.intent(outcome.intent.intent_id).unwrap();
    assert_eq!(unknown_leg(&stored.leg), (tx_hash, raw.clone()));

    let retried = second.retry_onchain(outcome.intent.intent_id).await.unwrap();
    assert!(matches!(retried.intent.leg, OnChainLeg::Broadcast { .. }));
    assert_eq!(h.rpc.sent(), vec![raw]);
    assert_eq!(h.device.signs(), 1);
}

#[tokio::test]
async fn test_unwritable_ledger_stops_the_leg() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intents.json");
    let h = Harness::new();
    let session = h.session();
    session.connect().await.unwrap();
    let intents = Arc::new(FakeIntents::default());

    let bridge = bridge(&h, &session, &intents)
        .with_ledger(IntentLedger::new(&path))
        .await
        .unwrap();
    // the staging file cannot be created once a directory sits there
    std::fs::create_dir(dir.path().join("intents.json.tmp")).unwrap();

    let err = bridge.submit_at(&request("1"), t0()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
    assert_eq!(h.device.signs(), 0);
    assert_eq!(h.rpc.attempts(), 0);
}
