//! TCP APDU exchange, as spoken by the Speculos emulator's APDU port and
//! by TCP bridges in front of a physical device.
//!
//! Request: `len (u32 BE) || apdu`. Response: `len (u32 BE) || data || sw`,
//! where `len` counts `data` only.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::apdu::{ApduExchange, EthereumApp};
use super::transport::{DeviceConnector, DeviceTransport, TransportError};
use crate::log_debug;

/// Largest response accepted from the device
const MAX_RESPONSE: usize = 1024;

pub struct TcpExchange {
    endpoint: String,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpExchange {
    pub async fn connect(endpoint: &str) -> Result<Self, TransportError> {
        let address = strip_scheme(endpoint);
        let stream = TcpStream::connect(address).await.map_err(|e| {
            TransportError::Unavailable(format!("cannot reach device at {}: {}", address, e))
        })?;
        stream.set_nodelay(true)?;

        log_debug!("speculos", "Connected to device", endpoint = address);
        Ok(Self {
            endpoint: address.to_string(),
            stream: Mutex::new(Some(stream)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn strip_scheme(endpoint: &str) -> &str {
    endpoint.trim().trim_start_matches("tcp://")
}

#[async_trait]
impl ApduExchange for TcpExchange {
    async fn exchange(&self, command: &[u8]) -> Result<(Vec<u8>, u16), TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| TransportError::Io("connection closed".to_string()))?;

        let mut frame = Vec::with_capacity(4 + command.len());
        frame.extend_from_slice(&(command.len() as u32).to_be_bytes());
        frame.extend_from_slice(command);
        stream.write_all(&frame).await?;

        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_RESPONSE {
            return Err(TransportError::Malformed(format!("response length {} too large", len)));
        }

        let mut body = vec![0u8; len + 2];
        stream.read_exact(&mut body).await?;
        let sw = u16::from_be_bytes([body[len], body[len + 1]]);
        body.truncate(len);
        Ok((body, sw))
    }

    async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }
}

/// Opens [`EthereumApp`] sessions over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: String,
}

impl TcpConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DeviceConnector for TcpConnector {
    async fn open(&self) -> Result<Arc<dyn DeviceTransport>, TransportError> {
        let exchange = TcpExchange::connect(&self.endpoint).await?;
        Ok(Arc::new(EthereumApp::new(exchange)))
    }
}
