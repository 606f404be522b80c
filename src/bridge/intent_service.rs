//! Off-chain transfer intent service.
//!
//! [`IntentService`] is the seam; [`CircleIntentService`] talks to a
//! Circle-style transfers API:
//! - `POST {base}/v1/transfers` with a caller-supplied `idempotencyKey`
//! - `GET {base}/v1/transfers/{id}`
//!
//! Both answer `{"data": {"id": ..., "status": ...}}` and authenticate
//! with a bearer API key.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::error::{ErrorCode, SendError, SendResult};
use crate::log_debug;
use crate::utils::http::{build_client, extract_domain, HttpTimeouts};

/// Sandbox endpoint of the Circle API
pub const CIRCLE_SANDBOX_URL: &str = "https://api-sandbox.circle.com";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntentServiceError {
    #[error("intent service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transfer {0} not found")]
    NotFound(String),

    #[error("intent service request timed out")]
    Timeout,

    #[error("intent service unreachable: {0}")]
    Transport(String),

    #[error("malformed intent service response: {0}")]
    Decode(String),
}

impl IntentServiceError {
    /// Safe to repeat: the service asked us to retry, or delivery is unknown
    /// and the idempotency key makes a repeat harmless
    pub fn is_retryable(&self) -> bool {
        match self {
            IntentServiceError::Http { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            IntentServiceError::Timeout | IntentServiceError::Transport(_) => true,
            IntentServiceError::NotFound(_) | IntentServiceError::Decode(_) => false,
        }
    }
}

impl From<IntentServiceError> for SendError {
    fn from(e: IntentServiceError) -> Self {
        match e {
            IntentServiceError::NotFound(_) => SendError::new(ErrorCode::IntentNotFound, e.to_string()),
            other => SendError::intent_service(other.to_string()),
        }
    }
}

/// Body of a create-transfer call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransfer {
    pub idempotency_key: Uuid,
    pub source: TransferSource,
    pub destination: TransferDestination,
    pub amount: TransferAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferDestination {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
    /// Service chain code, e.g. `ETH` or `BASE`
    pub chain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferAmount {
    pub amount: String,
    pub currency: String,
}

impl CreateTransfer {
    pub fn new(
        idempotency_key: Uuid,
        source_wallet: &str,
        destination_address: &str,
        destination_chain: &str,
        amount: &str,
        currency: &str,
    ) -> Self {
        Self {
            idempotency_key,
            source: TransferSource {
                kind: "wallet".to_string(),
                id: source_wallet.to_string(),
            },
            destination: TransferDestination {
                kind: "blockchain".to_string(),
                address: destination_address.to_string(),
                chain: destination_chain.to_string(),
            },
            amount: TransferAmount {
                amount: amount.to_string(),
                currency: currency.to_string(),
            },
        }
    }
}

/// Transfer as the service reports it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteTransfer {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Service chain code for a chain key: the part before the first `-`
pub fn service_chain_code(chain_key: &str) -> String {
    chain_key
        .split('-')
        .next()
        .unwrap_or(chain_key)
        .to_uppercase()
}

#[async_trait]
pub trait IntentService: Send + Sync {
    async fn create_transfer(&self, request: &CreateTransfer) -> Result<RemoteTransfer, IntentServiceError>;

    async fn get_transfer(&self, id: &str) -> Result<RemoteTransfer, IntentServiceError>;
}

pub struct CircleIntentService {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl CircleIntentService {
    pub fn new(base_url: Url, api_key: impl Into<String>, timeouts: HttpTimeouts) -> SendResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SendError::config("Intent service API key is not set"));
        }
        Ok(Self {
            client: build_client(timeouts)?,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn read<T: DeserializeOwned>(
        &self,
        response: Result<reqwest::Response, reqwest::Error>,
        id: Option<&str>,
    ) -> Result<T, IntentServiceError> {
        let response = response.map_err(classify_reqwest)?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(IntentServiceError::NotFound(id.to_string()));
            }
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IntentServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<T> = response.json().await.map_err(classify_reqwest)?;
        Ok(envelope.data)
    }
}

fn classify_reqwest(e: reqwest::Error) -> IntentServiceError {
    if e.is_timeout() {
        IntentServiceError::Timeout
    } else if e.is_decode() {
        IntentServiceError::Decode(e.to_string())
    } else {
        IntentServiceError::Transport(e.to_string())
    }
}

#[async_trait]
impl IntentService for CircleIntentService {
    async fn create_transfer(&self, request: &CreateTransfer) -> Result<RemoteTransfer, IntentServiceError> {
        let url = self.endpoint("v1/transfers");
        log_debug!(
            "intent_service",
            "Creating transfer",
            host = extract_domain(&url),
            idempotency_key = request.idempotency_key,
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await;
        self.read(response, None).await
    }

    async fn get_transfer(&self, id: &str) -> Result<RemoteTransfer, IntentServiceError> {
        let url = self.endpoint(&format!("v1/transfers/{}", id));
        let response = self.client.get(&url).bearer_auth(&self.api_key).send().await;
        self.read(response, Some(id)).await
    }
}
