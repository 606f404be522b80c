//! HTTP Client Construction
//!
//! Every outbound HTTP call (chain RPC, naming lookups, intent service)
//! goes through a client built here so timeouts are always explicit.

use reqwest::Client;
use std::time::Duration;

use crate::error::{SendError, SendResult};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("hwsend/", env!("CARGO_PKG_VERSION"));

/// Timeouts applied to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request: Duration,
    pub connect: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            connect: Duration::from_secs(10),
        }
    }
}

/// Build an async client with pooling and the given timeouts
pub fn build_client(timeouts: HttpTimeouts) -> SendResult<Client> {
    Client::builder()
        .timeout(timeouts.request)
        .connect_timeout(timeouts.connect)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(5)
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SendError::network(format!("Failed to create HTTP client: {}", e)))
}

/// Extract host[:port] from a URL, for log fields
pub fn extract_domain(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(url)
        .to_string()
}
