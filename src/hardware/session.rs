//! Hardware Signer Session
//!
//! Owns the single exclusive connection to the signing device:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (SigningInFlight -> Connected)* -> Disconnected
//! ```
//!
//! At most one signing request is in flight; a concurrent request fails
//! fast with `SignerBusy` instead of queueing behind a human confirmation.
//! A holder rejection keeps the session, any other device failure tears it
//! down. State lives behind a synchronous mutex that is never held across
//! an await, so `disconnect` always completes immediately.

use chrono::Utc;
use ethers_core::types::Address;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::address_cache::{AddressCache, CachedAccount};
use super::derivation_path::DerivationPath;
use super::transport::{DeviceConnector, DeviceTransport, TransportError};
use crate::error::{ErrorCode, SendError, SendResult};
use crate::types::{ChainId, SignatureMaterial};
use crate::utils::crypto::to_checksum_address;
use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    SigningInFlight,
}

/// Device call deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub address: Duration,
    /// Covers the holder reading and confirming on the device
    pub sign: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            address: Duration::from_secs(10),
            sign: Duration::from_secs(120),
        }
    }
}

struct Inner {
    state: SessionState,
    transport: Option<Arc<dyn DeviceTransport>>,
    address: Option<Address>,
    /// Bumped on every connect and teardown; stale completions compare it
    generation: u64,
}

impl Inner {
    fn teardown(&mut self) -> Option<Arc<dyn DeviceTransport>> {
        self.state = SessionState::Disconnected;
        self.address = None;
        self.generation += 1;
        self.transport.take()
    }
}

pub struct SignerSession {
    connector: Arc<dyn DeviceConnector>,
    path: DerivationPath,
    timeouts: SessionTimeouts,
    cache: Option<AddressCache>,
    inner: Mutex<Inner>,
}

impl SignerSession {
    pub fn new(connector: Arc<dyn DeviceConnector>, path: DerivationPath) -> Self {
        Self {
            connector,
            path,
            timeouts: SessionTimeouts::default(),
            cache: None,
            inner: Mutex::new(Inner {
                state: SessionState::Disconnected,
                transport: None,
                address: None,
                generation: 0,
            }),
        }
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_cache(mut self, cache: AddressCache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Account address while connected
    pub fn address(&self) -> Option<Address> {
        self.lock().address
    }

    pub fn derivation_path(&self) -> &DerivationPath {
        &self.path
    }

    /// Open the device and derive the account address.
    ///
    /// Connecting an already connected session returns the known address
    /// without touching the device.
    pub async fn connect(&self) -> SendResult<Address> {
        let generation = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Connected => {
                    return inner
                        .address
                        .ok_or_else(|| SendError::internal("Connected session has no address"));
                }
                SessionState::Connecting | SessionState::SigningInFlight => {
                    return Err(SendError::signer_busy());
                }
                SessionState::Disconnected => {
                    inner.state = SessionState::Connecting;
                    inner.generation += 1;
                    inner.generation
                }
            }
        };
        let mut guard = PhaseGuard::new(self, generation, SessionState::Connecting);

        let opened = self.open_and_derive().await;

        let (transport, address) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                guard.finish(false);
                log_warn!("session", "Device connection failed", error = e);
                return Err(e.into());
            }
        };

        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != SessionState::Connecting {
                drop(inner);
                guard.disarm();
                transport.close().await;
                return Err(SendError::device_unavailable("Session was closed while connecting"));
            }
            inner.state = SessionState::Connected;
            inner.transport = Some(transport);
            inner.address = Some(address);
        }
        guard.disarm();

        let display = to_checksum_address(address.as_bytes());
        if let Some(cache) = &self.cache {
            let account = CachedAccount {
                address: display.clone(),
                derivation_path: self.path.to_string(),
                connected_at: Utc::now(),
            };
            if let Err(e) = cache.store(&account).await {
                log_warn!("session", "Could not write address cache", error = e);
            }
        }
        log_info!("session", "Signer connected", address = display, path = self.path);

        Ok(address)
    }

    async fn open_and_derive(&self) -> Result<(Arc<dyn DeviceTransport>, Address), TransportError> {
        let transport = self.connector.open().await?;
        match with_deadline(self.timeouts.address, transport.get_address(&self.path)).await {
            Ok(address) => Ok((transport, address)),
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    /// Release the device. Always succeeds, also mid-operation.
    pub async fn disconnect(&self) {
        let (transport, was) = {
            let mut inner = self.lock();
            let was = inner.state;
            (inner.teardown(), was)
        };
        if let Some(transport) = transport {
            transport.close().await;
        }
        self.forget_cached_account().await;
        if was != SessionState::Disconnected {
            log_info!("session", "Signer disconnected");
        }
    }

    async fn forget_cached_account(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear().await {
                log_warn!("session", "Could not clear address cache", error = e);
            }
        }
    }

    /// Sign a serialized unsigned transaction for `chain_id`.
    ///
    /// The device re-derives the session address first; a different
    /// account on the device is a communication error.
    pub async fn sign_transaction(&self, payload: &[u8], chain_id: ChainId) -> SendResult<SignatureMaterial> {
        let (transport, expected, generation) = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Connected => {}
                SessionState::Connecting | SessionState::SigningInFlight => {
                    return Err(SendError::signer_busy());
                }
                SessionState::Disconnected => {
                    return Err(SendError::device_unavailable("Signer is not connected"));
                }
            }
            let (transport, address) = match (inner.transport.clone(), inner.address) {
                (Some(transport), Some(address)) => (transport, address),
                _ => return Err(SendError::internal("Connected session has no device")),
            };
            inner.state = SessionState::SigningInFlight;
            (transport, address, inner.generation)
        };
        let mut guard = PhaseGuard::new(self, generation, SessionState::SigningInFlight);

        let result = self.sign_with(transport.as_ref(), expected, payload, chain_id).await;

        let keep = match &result {
            Ok(_) => true,
            Err(e) => e.code == ErrorCode::UserRejected,
        };
        match guard.finish(keep) {
            Finish::Kept => {}
            Finish::TornDown(released) => {
                if let Some(released) = released {
                    released.close().await;
                }
                self.forget_cached_account().await;
            }
            Finish::Stale => {
                return Err(SendError::device_unavailable("Signer was disconnected during signing"));
            }
        }

        match &result {
            Ok(_) => log_info!("session", "Transaction signed", chain_id = chain_id),
            Err(e) if e.code == ErrorCode::UserRejected => {
                log_info!("session", "Signing rejected on device")
            }
            Err(e) => log_warn!("session", "Signing failed, session closed", error = e),
        }
        result
    }

    async fn sign_with(
        &self,
        transport: &dyn DeviceTransport,
        expected: Address,
        payload: &[u8],
        chain_id: ChainId,
    ) -> SendResult<SignatureMaterial> {
        let current = with_deadline(self.timeouts.address, transport.get_address(&self.path)).await?;
        if current != expected {
            return Err(SendError::device_communication(format!(
                "Device account changed from {} to {}",
                to_checksum_address(expected.as_bytes()),
                to_checksum_address(current.as_bytes())
            )));
        }

        let raw = with_deadline(self.timeouts.sign, transport.sign_transaction(&self.path, payload)).await?;
        let typed = payload.first().map_or(false, |b| *b < 0xc0);
        let recovery_id = normalize_v(raw.v, typed, chain_id)?;
        Ok(SignatureMaterial::new(raw.r, raw.s, recovery_id))
    }
}

async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| TransportError::Timeout(deadline))?
}

/// Recovery id from the device's `v` byte.
///
/// Typed transactions carry the parity as 0/1 (or 27/28). Legacy ones may
/// carry the low byte of `chainId * 2 + 35 + parity`.
pub fn normalize_v(v: u8, typed: bool, chain_id: ChainId) -> Result<u8, TransportError> {
    if !typed {
        let base = (chain_id.wrapping_mul(2).wrapping_add(35) & 0xff) as u8;
        if v == base {
            return Ok(0);
        }
        if v == base.wrapping_add(1) {
            return Ok(1);
        }
    }
    match v {
        0 | 1 => Ok(v),
        27 | 28 => Ok(v - 27),
        _ => Err(TransportError::Malformed(format!(
            "signature v {} does not match chain {}",
            v, chain_id
        ))),
    }
}

enum Finish {
    Kept,
    TornDown(Option<Arc<dyn DeviceTransport>>),
    /// The session moved on (disconnect) while the call ran
    Stale,
}

/// Leaves a transitional state; a dropped future tears the session down
struct PhaseGuard<'a> {
    session: &'a SignerSession,
    generation: u64,
    phase: SessionState,
    armed: bool,
}

impl<'a> PhaseGuard<'a> {
    fn new(session: &'a SignerSession, generation: u64, phase: SessionState) -> Self {
        Self {
            session,
            generation,
            phase,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn finish(&mut self, keep: bool) -> Finish {
        self.armed = false;
        let mut inner = self.session.lock();
        if inner.generation != self.generation || inner.state != self.phase {
            return Finish::Stale;
        }
        if keep {
            inner.state = SessionState::Connected;
            Finish::Kept
        } else {
            Finish::TornDown(inner.teardown())
        }
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.session.lock();
        if inner.generation == self.generation && inner.state == self.phase {
            // dropping the transport closes the connection
            inner.teardown();
        }
    }
}
