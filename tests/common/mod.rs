//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use ethers_core::types::{Address, H256, U256, U64};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use hwsend::bridge::{CreateTransfer, IntentService, IntentServiceError, RemoteTransfer};
use hwsend::chains::{coin_types, ChainDescriptor, ChainRegistry, BASE_MAINNET, BASE_SEPOLIA};
use hwsend::hardware::{DerivationPath, DeviceConnector, DeviceTransport, RawSignature, SignerSession, TransportError};
use hwsend::pipeline::{PipelineSettings, SendPipeline};
use hwsend::resolver::{NameGrammar, NameService, NormalizedName, Resolver};
use hwsend::rpc::{ChainRpc, RpcError, TxReceipt};
use hwsend::tx::BroadcastConfig;
use hwsend::utils::BackoffPolicy;
use hwsend::{keccak256, SendResult};

/// Record stored for `alice.eth` on every EVM coin type
pub const ALICE: [u8; 20] = [
    0xab, 0xcd, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x12, 0x34,
];

pub const MINED_BLOCK: u64 = 100;

// =============================================================================
// Device
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Approve,
    Reject,
    /// Transport dies mid-call
    Fault,
    /// Wait for `release()` before signing
    Hold,
    /// Sign with a key other than the one the address came from
    WrongKey,
}

pub struct FakeDevice {
    secret: SecretKey,
    other: SecretKey,
    behavior: Mutex<Behavior>,
    released: Notify,
    pub sign_calls: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            secret: SecretKey::from_slice(&[0x42; 32]).unwrap(),
            other: SecretKey::from_slice(&[0x24; 32]).unwrap(),
            behavior: Mutex::new(Behavior::Approve),
            released: Notify::new(),
            sign_calls: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn address(&self) -> Address {
        address_of(&self.secret)
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Let a held signature complete
    pub fn release(&self) {
        self.released.notify_one();
    }

    pub fn signs(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

pub fn address_of(secret: &SecretKey) -> Address {
    let public = PublicKey::from_secret_key(&Secp256k1::new(), secret).serialize_uncompressed();
    Address::from_slice(&keccak256(&public[1..])[12..])
}

fn sign(secret: &SecretKey, payload: &[u8]) -> RawSignature {
    let message = Message::from_digest(keccak256(payload));
    let (recovery_id, compact) = Secp256k1::new()
        .sign_ecdsa_recoverable(&message, secret)
        .serialize_compact();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&compact[..32]);
    s.copy_from_slice(&compact[32..]);
    RawSignature {
        v: 27 + recovery_id.to_i32() as u8,
        r,
        s,
    }
}

#[async_trait]
impl DeviceTransport for FakeDevice {
    async fn get_address(&self, _path: &DerivationPath) -> Result<Address, TransportError> {
        Ok(self.address())
    }

    async fn sign_transaction(&self, _path: &DerivationPath, payload: &[u8]) -> Result<RawSignature, TransportError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            Behavior::Approve => Ok(sign(&self.secret, payload)),
            Behavior::Reject => Err(TransportError::UserDenied),
            Behavior::Fault => Err(TransportError::Io("device reset".into())),
            Behavior::WrongKey => Ok(sign(&self.other, payload)),
            Behavior::Hold => {
                self.released.notified().await;
                Ok(sign(&self.secret, payload))
            }
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeConnector {
    pub device: Arc<FakeDevice>,
    pub available: AtomicBool,
    pub opens: AtomicUsize,
}

impl FakeConnector {
    pub fn new(device: Arc<FakeDevice>) -> Arc<Self> {
        Arc::new(Self {
            device,
            available: AtomicBool::new(true),
            opens: AtomicUsize::new(0),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceConnector for FakeConnector {
    async fn open(&self) -> Result<Arc<dyn DeviceTransport>, TransportError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("no device on the bus".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.device.clone())
    }
}

// =============================================================================
// Chain RPC
// =============================================================================

pub struct FakeRpc {
    pub nonce: U256,
    pub gas_price: U256,
    pub priority_fee: U256,
    /// Errors returned by the next broadcasts, in order
    pub broadcast_failures: Mutex<VecDeque<RpcError>>,
    /// Errors returned after the next broadcasts were accepted
    pub lost_replies: Mutex<VecDeque<RpcError>>,
    pub broadcast_attempts: AtomicUsize,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub mine: AtomicBool,
    pub revert: AtomicBool,
}

impl Default for FakeRpc {
    fn default() -> Self {
        Self {
            nonce: U256::from(7u64),
            gas_price: U256::from(1_000_000_000u64),
            priority_fee: U256::from(100_000_000u64),
            broadcast_failures: Mutex::new(VecDeque::new()),
            lost_replies: Mutex::new(VecDeque::new()),
            broadcast_attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            mine: AtomicBool::new(true),
            revert: AtomicBool::new(false),
        }
    }
}

impl FakeRpc {
    pub fn fail_next_broadcast(&self, error: RpcError) {
        self.broadcast_failures.lock().unwrap().push_back(error);
    }

    /// Accept the next broadcast but answer with `error`
    pub fn lose_next_reply(&self, error: RpcError) {
        self.lost_replies.lock().unwrap().push_back(error);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.broadcast_attempts.load(Ordering::SeqCst)
    }
}

pub fn unavailable() -> RpcError {
    RpcError::Http {
        endpoint: "rpc.test".into(),
        status: 503,
        body: "upstream unavailable".into(),
    }
}

pub fn timeout() -> RpcError {
    RpcError::Timeout {
        endpoint: "rpc.test".into(),
    }
}

pub fn node_error(message: &str) -> RpcError {
    RpcError::Node {
        code: -32000,
        message: message.to_string(),
    }
}

#[async_trait]
impl ChainRpc for FakeRpc {
    async fn transaction_count(&self, _: &ChainDescriptor, _: Address) -> Result<U256, RpcError> {
        Ok(self.nonce)
    }

    async fn gas_price(&self, _: &ChainDescriptor) -> Result<U256, RpcError> {
        Ok(self.gas_price)
    }

    async fn max_priority_fee(&self, _: &ChainDescriptor) -> Result<U256, RpcError> {
        Ok(self.priority_fee)
    }

    async fn send_raw_transaction(&self, _: &ChainDescriptor, raw: &[u8]) -> Result<H256, RpcError> {
        self.broadcast_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.broadcast_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.sent.lock().unwrap().push(raw.to_vec());
        if let Some(error) = self.lost_replies.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(H256::from(keccak256(raw)))
    }

    async fn transaction_receipt(&self, _: &ChainDescriptor, hash: H256) -> Result<Option<TxReceipt>, RpcError> {
        if !self.mine.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let known = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .any(|raw| H256::from(keccak256(raw)) == hash);
        if !known {
            return Ok(None);
        }
        let status = if self.revert.load(Ordering::SeqCst) { 0u64 } else { 1 };
        Ok(Some(TxReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(MINED_BLOCK)),
            status: Some(U64::from(status)),
        }))
    }

    async fn block_number(&self, _: &ChainDescriptor) -> Result<u64, RpcError> {
        Ok(MINED_BLOCK)
    }

    async fn call(&self, _: &ChainDescriptor, _: Address, _: &[u8]) -> Result<Vec<u8>, RpcError> {
        Err(RpcError::Transport("eth_call is not scripted".into()))
    }
}

// =============================================================================
// Names
// =============================================================================

#[derive(Default)]
pub struct FakeNames {
    records: HashMap<(String, u32), Vec<u8>>,
    pub lookups: AtomicUsize,
}

impl FakeNames {
    pub fn with(mut self, name: &str, coin_type: u32, record: &[u8]) -> Self {
        self.records.insert((name.to_string(), coin_type), record.to_vec());
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NameService for FakeNames {
    async fn resolve_record(
        &self,
        _naming_chain: &ChainDescriptor,
        name: &NormalizedName,
        coin_type: u32,
    ) -> SendResult<Option<Vec<u8>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.get(&(name.as_str().to_string(), coin_type)).cloned())
    }
}

// =============================================================================
// Intent service
// =============================================================================

#[derive(Default)]
pub struct FakeIntents {
    pub create_failures: Mutex<VecDeque<IntentServiceError>>,
    /// Statuses returned by successive status checks; the last one repeats
    pub statuses: Mutex<VecDeque<String>>,
    pub created: Mutex<Vec<CreateTransfer>>,
    pub create_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl FakeIntents {
    pub fn with_statuses(statuses: &[&str]) -> Self {
        let intents = Self::default();
        intents
            .statuses
            .lock()
            .unwrap()
            .extend(statuses.iter().map(|s| s.to_string()));
        intents
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentService for FakeIntents {
    async fn create_transfer(&self, request: &CreateTransfer) -> Result<RemoteTransfer, IntentServiceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.create_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.created.lock().unwrap().push(request.clone());
        Ok(RemoteTransfer {
            id: format!("remote-{}", request.idempotency_key),
            status: "pending".into(),
        })
    }

    async fn get_transfer(&self, id: &str) -> Result<RemoteTransfer, IntentServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front().unwrap_or_default()
        } else {
            statuses.front().cloned().unwrap_or_else(|| "pending".to_string())
        };
        Ok(RemoteTransfer {
            id: id.to_string(),
            status,
        })
    }
}

// =============================================================================
// Wiring
// =============================================================================

pub struct Harness {
    pub registry: Arc<ChainRegistry>,
    pub rpc: Arc<FakeRpc>,
    pub names: Arc<FakeNames>,
    pub device: Arc<FakeDevice>,
    pub connector: Arc<FakeConnector>,
    pub resolver: Arc<Resolver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_rpc(FakeRpc::default())
    }

    pub fn with_rpc(rpc: FakeRpc) -> Self {
        let registry = Arc::new(ChainRegistry::builtin().unwrap());
        let names = Arc::new(
            FakeNames::default()
                .with("alice.eth", coin_types::evm(BASE_SEPOLIA), &ALICE)
                .with("alice.eth", coin_types::evm(BASE_MAINNET), &ALICE)
                .with("alice.eth", coin_types::ETHEREUM, &ALICE),
        );
        let device = FakeDevice::new();
        let connector = FakeConnector::new(device.clone());
        let resolver = Arc::new(Resolver::new(registry.clone(), names.clone(), NameGrammar::default()));
        Self {
            registry,
            rpc: Arc::new(rpc),
            names,
            device,
            connector,
            resolver,
        }
    }

    pub fn session(&self) -> SignerSession {
        SignerSession::new(self.connector.clone(), "m/44'/60'/0'/0/0".parse().unwrap())
    }

    pub fn settings() -> PipelineSettings {
        PipelineSettings {
            confirmation: BackoffPolicy::immediate(3),
            broadcast: BroadcastConfig {
                retry_delay: Duration::ZERO,
            },
            ..PipelineSettings::default()
        }
    }

    pub fn pipeline<'s>(&self, session: &'s SignerSession) -> SendPipeline<'s> {
        SendPipeline::new(
            self.registry.clone(),
            self.resolver.clone(),
            self.rpc.clone(),
            session,
            Self::settings(),
        )
    }
}
