//! JSON-RPC over HTTP using `reqwest`.

use async_trait::async_trait;
use ethers_core::types::{Address, Bytes, H256, U256, U64};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ChainRpc, RpcError, TxReceipt};
use crate::chains::ChainDescriptor;
use crate::error::SendResult;
use crate::log_debug;
use crate::utils::http::{build_client, extract_domain, HttpTimeouts};

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// `reqwest`-backed [`ChainRpc`]
pub struct HttpChainRpc {
    client: Client,
    next_id: AtomicU64,
}

impl HttpChainRpc {
    pub fn new(timeouts: HttpTimeouts) -> SendResult<Self> {
        Ok(Self::with_client(build_client(timeouts)?))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            next_id: AtomicU64::new(1),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        chain: &ChainDescriptor,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let endpoint = chain.rpc_endpoint.as_str();
        let body = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        log_debug!("rpc", "Sending request", method = method, host = extract_domain(endpoint));

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Http {
                endpoint: extract_domain(endpoint),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| classify_reqwest(endpoint, e))?;

        if let Some(error) = parsed.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(parsed.result.unwrap_or(Value::Null))
            .map_err(|e| RpcError::Decode(format!("{}: {}", method, e)))
    }
}

fn classify_reqwest(endpoint: &str, e: reqwest::Error) -> RpcError {
    if e.is_timeout() {
        RpcError::Timeout {
            endpoint: extract_domain(endpoint),
        }
    } else if e.is_decode() {
        RpcError::Decode(e.to_string())
    } else {
        RpcError::Transport(e.to_string())
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn transaction_count(&self, chain: &ChainDescriptor, address: Address) -> Result<U256, RpcError> {
        self.request(chain, "eth_getTransactionCount", json!([address, "pending"]))
            .await
    }

    async fn gas_price(&self, chain: &ChainDescriptor) -> Result<U256, RpcError> {
        self.request(chain, "eth_gasPrice", json!([])).await
    }

    async fn max_priority_fee(&self, chain: &ChainDescriptor) -> Result<U256, RpcError> {
        self.request(chain, "eth_maxPriorityFeePerGas", json!([])).await
    }

    async fn send_raw_transaction(&self, chain: &ChainDescriptor, raw: &[u8]) -> Result<H256, RpcError> {
        let raw_hex = format!("0x{}", hex::encode(raw));
        self.request(chain, "eth_sendRawTransaction", json!([raw_hex]))
            .await
    }

    async fn transaction_receipt(&self, chain: &ChainDescriptor, hash: H256) -> Result<Option<TxReceipt>, RpcError> {
        self.request(chain, "eth_getTransactionReceipt", json!([hash]))
            .await
    }

    async fn block_number(&self, chain: &ChainDescriptor) -> Result<u64, RpcError> {
        let number: U64 = self.request(chain, "eth_blockNumber", json!([])).await?;
        Ok(number.as_u64())
    }

    async fn call(&self, chain: &ChainDescriptor, to: Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let params = json!([
            { "to": to, "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        let result: Bytes = self.request(chain, "eth_call", params).await?;
        Ok(result.to_vec())
    }
}
