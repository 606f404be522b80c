//! Device transport seam.
//!
//! [`DeviceTransport`] is one open connection to a signing device;
//! [`DeviceConnector`] opens them. The session owns at most one transport
//! at a time.

use async_trait::async_trait;
use ethers_core::types::Address;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::derivation_path::DerivationPath;
use crate::error::SendError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No device, device locked, or the Ethereum app is not open
    #[error("device unavailable: {0}")]
    Unavailable(String),

    /// The holder refused on the device
    #[error("denied on device")]
    UserDenied,

    #[error("device returned status {0:#06x}")]
    Status(u16),

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("malformed device response: {0}")]
    Malformed(String),

    #[error("device did not answer within {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// The session must be torn down after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::UserDenied)
    }
}

impl From<TransportError> for SendError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable(msg) => SendError::device_unavailable(msg),
            TransportError::UserDenied => SendError::user_rejected(),
            other => SendError::device_communication(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                TransportError::Unavailable(e.to_string())
            }
            _ => TransportError::Io(e.to_string()),
        }
    }
}

/// Signature exactly as the device returned it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

/// One open device connection
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Account address at `path`
    async fn get_address(&self, path: &DerivationPath) -> Result<Address, TransportError>;

    /// Sign a serialized unsigned transaction; blocks until the holder answers
    async fn sign_transaction(&self, path: &DerivationPath, payload: &[u8]) -> Result<RawSignature, TransportError>;

    /// Release the connection
    async fn close(&self);
}

/// Opens device connections
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn DeviceTransport>, TransportError>;
}
