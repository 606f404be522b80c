//! Bridge module
//!
//! Pairs an off-chain transfer intent with a single on-chain broadcast.
//! Intents are keyed by an idempotency key so a repeated request inside
//! one time bucket never creates a second intent or a second broadcast,
//! also across runs when the ledger is persisted.

pub mod idempotency;
pub mod intent_service;
pub mod ledger;
pub mod orchestrator;
pub mod types;


pub use idempotency::{idempotency_key, time_bucket, DEFAULT_BUCKET_SECS};
pub use intent_service::{
    CircleIntentService, CreateTransfer, IntentService, IntentServiceError, RemoteTransfer,
    CIRCLE_SANDBOX_URL,
};
pub use ledger::{IntentLedger, LedgerRecord};
pub use orchestrator::{BridgeOrchestrator, BridgeSettings};
pub use types::*;
