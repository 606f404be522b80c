//! Unified error types for hwsend
//!
//! Every component reports failures through [`SendError`] so callers get a
//! stable, serializable error code regardless of which layer failed.
//! Module-local `thiserror` enums (RPC, device transport, intent service)
//! convert into it at the component boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for all hwsend operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl SendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors
    pub fn unresolvable_recipient(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnresolvableRecipient, msg)
    }

    pub fn unknown_chain(chain_id: u64) -> Self {
        Self::new(ErrorCode::UnknownChain, format!("Chain {} is not registered", chain_id))
    }

    pub fn unsupported_chain(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedChain, msg)
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidAmount, msg)
    }

    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeviceUnavailable, msg)
    }

    pub fn signer_busy() -> Self {
        Self::new(ErrorCode::SignerBusy, "Signer session is busy with another request")
    }

    pub fn user_rejected() -> Self {
        Self::new(ErrorCode::UserRejected, "Request was rejected on the device")
    }

    pub fn device_communication(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeviceCommunicationError, msg)
    }

    pub fn broadcast_rejected(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::BroadcastRejected, msg)
    }

    pub fn stale_nonce(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::StaleNonce, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, msg)
    }

    pub fn intent_service(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::IntentServiceError, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    /// Broad class of the failure, used to decide propagation
    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for SendError {}

/// Error codes for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Validation errors
    UnresolvableRecipient,
    UnknownChain,
    UnsupportedChain,
    InvalidAmount,

    // Device errors
    DeviceUnavailable,
    SignerBusy,
    UserRejected,
    DeviceCommunicationError,

    // Chain errors
    BroadcastRejected,
    StaleNonce,

    // Network errors
    NetworkError,

    // Bridge errors
    IntentServiceError,
    IntentNotFound,
    IntentAlreadyBroadcast,

    // Internal
    ConfigError,
    Internal,
}

/// Propagation class of an error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rejected before any device interaction
    Validation,
    /// Raised by the signer session or the device itself
    Device,
    /// Node answered and refused the transaction
    Chain,
    /// Transport-level failure talking to a remote service
    Network,
    Bridge,
    Internal,
}

impl ErrorCode {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorCode::UnresolvableRecipient
            | ErrorCode::UnknownChain
            | ErrorCode::UnsupportedChain
            | ErrorCode::InvalidAmount => ErrorClass::Validation,
            ErrorCode::DeviceUnavailable
            | ErrorCode::SignerBusy
            | ErrorCode::UserRejected
            | ErrorCode::DeviceCommunicationError => ErrorClass::Device,
            ErrorCode::BroadcastRejected | ErrorCode::StaleNonce => ErrorClass::Chain,
            ErrorCode::NetworkError => ErrorClass::Network,
            ErrorCode::IntentServiceError
            | ErrorCode::IntentNotFound
            | ErrorCode::IntentAlreadyBroadcast => ErrorClass::Bridge,
            ErrorCode::ConfigError | ErrorCode::Internal => ErrorClass::Internal,
        }
    }

    /// Whether the caller should expect the session to be torn down
    pub fn tears_down_session(self) -> bool {
        matches!(self, ErrorCode::DeviceCommunicationError)
    }
}

/// Result type alias for hwsend operations
pub type SendResult<T> = Result<T, SendError>;

// Conversions from common error types

impl From<serde_json::Error> for SendError {
    fn from(e: serde_json::Error) -> Self {
        SendError::new(ErrorCode::Internal, format!("JSON error: {}", e))
    }
}

impl From<hex::FromHexError> for SendError {
    fn from(e: hex::FromHexError) -> Self {
        SendError::new(ErrorCode::Internal, format!("Hex error: {}", e))
    }
}

impl From<std::io::Error> for SendError {
    fn from(e: std::io::Error) -> Self {
        SendError::new(ErrorCode::Internal, e.to_string())
    }
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SendError::network("Request timed out")
        } else if e.is_connect() {
            SendError::network("Connection failed")
        } else {
            SendError::network(e.to_string())
        }
    }
}

impl From<url::ParseError> for SendError {
    fn from(e: url::ParseError) -> Self {
        SendError::config(format!("Invalid URL: {}", e))
    }
}
