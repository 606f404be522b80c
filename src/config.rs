//! Configuration
//!
//! [`AppConfig`] is read from an optional TOML file, after `.env` has been
//! loaded, and then patched from the environment:
//!
//! | variable                  | overrides                 |
//! |---------------------------|---------------------------|
//! | `HWSEND_CONFIG`           | config file path          |
//! | `HWSEND_DEVICE`           | `device.endpoint`         |
//! | `HWSEND_RPC_<CHAIN_ID>`   | RPC endpoint of one chain |
//! | `HWSEND_INTENT_API_KEY`   | `bridge.api_key`          |
//! | `HWSEND_INTENT_BASE_URL`  | `bridge.base_url`         |
//! | `HWSEND_CACHE_PATH`       | `cache.path`              |
//! | `HWSEND_LEDGER_PATH`      | `bridge.ledger_path`      |

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::bridge::{BridgeSettings, CIRCLE_SANDBOX_URL, DEFAULT_BUCKET_SECS};
use crate::chains::{ChainDescriptor, ChainRegistry};
use crate::error::{SendError, SendResult};
use crate::hardware::{DerivationPath, SessionTimeouts, DEFAULT_DERIVATION_PATH};
use crate::pipeline::PipelineSettings;
use crate::resolver::NameGrammar;
use crate::tx::{BroadcastConfig, TRANSFER_GAS_LIMIT};
use crate::types::ChainId;
use crate::log_debug;
use crate::utils::{BackoffPolicy, HttpTimeouts};

pub const CONFIG_ENV: &str = "HWSEND_CONFIG";
pub const DEVICE_ENV: &str = "HWSEND_DEVICE";
pub const RPC_ENV_PREFIX: &str = "HWSEND_RPC_";
pub const INTENT_API_KEY_ENV: &str = "HWSEND_INTENT_API_KEY";
pub const INTENT_BASE_URL_ENV: &str = "HWSEND_INTENT_BASE_URL";
pub const CACHE_PATH_ENV: &str = "HWSEND_CACHE_PATH";
pub const LEDGER_PATH_ENV: &str = "HWSEND_LEDGER_PATH";

/// Default Speculos APDU port
pub const DEFAULT_DEVICE_ENDPOINT: &str = "tcp://127.0.0.1:9999";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub endpoint: String,
    pub derivation_path: String,
    pub address_timeout_secs: u64,
    pub sign_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_DEVICE_ENDPOINT.to_string(),
            derivation_path: DEFAULT_DERIVATION_PATH.to_string(),
            address_timeout_secs: 10,
            sign_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub broadcast_retry_delay_ms: u64,
    pub default_fee_limit: u64,
    /// Endpoint overrides keyed by chain id
    pub endpoints: BTreeMap<String, Url>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            broadcast_retry_delay_ms: 1500,
            default_fee_limit: TRANSFER_GAS_LIMIT,
            endpoints: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub suffixes: Vec<String>,
    /// ENS registry address; the canonical deployment when unset
    pub registry: Option<String>,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            suffixes: vec!["eth".to_string()],
            registry: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub currency: String,
    pub bucket_secs: u64,
    pub poll: BackoffPolicy,
    /// Intent ledger file; next to the address cache when unset
    pub ledger_path: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let settings = BridgeSettings::default();
        Self {
            base_url: CIRCLE_SANDBOX_URL.to_string(),
            api_key: None,
            currency: settings.currency,
            bucket_secs: DEFAULT_BUCKET_SECS,
            poll: settings.poll,
            ledger_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// `~/.hwsend/account.json` when unset
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub rpc: RpcConfig,
    pub confirmation: BackoffPolicy,
    pub naming: NamingConfig,
    pub bridge: BridgeConfig,
    pub cache: CacheConfig,
    /// Extra or replacement chain descriptors
    pub chains: Vec<ChainDescriptor>,
}

impl AppConfig {
    /// Load `.env`, the config file (explicit path, then `HWSEND_CONFIG`)
    /// and environment overrides, then validate
    pub fn load(path: Option<&Path>) -> SendResult<Self> {
        if let Ok(env_file) = dotenvy::dotenv() {
            log_debug!("config", "Loaded environment file", path = env_file.display());
        }

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> SendResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SendError::config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> SendResult<Self> {
        toml::from_str(raw).map_err(|e| SendError::config(format!("Invalid configuration: {}", e)))
    }

    /// Apply `HWSEND_*` overrides from a variable list
    pub fn apply_env<I>(&mut self, vars: I) -> SendResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                DEVICE_ENV => self.device.endpoint = value,
                INTENT_API_KEY_ENV => self.bridge.api_key = Some(value),
                INTENT_BASE_URL_ENV => self.bridge.base_url = value,
                CACHE_PATH_ENV => self.cache.path = Some(PathBuf::from(value)),
                LEDGER_PATH_ENV => self.bridge.ledger_path = Some(PathBuf::from(value)),
                _ => {
                    if let Some(chain) = key.strip_prefix(RPC_ENV_PREFIX) {
                        let url = parse_url(&key, &value)?;
                        self.rpc.endpoints.insert(chain.to_string(), url);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> SendResult<()> {
        self.derivation_path()?;
        self.rpc_overrides()?;

        for url in self.rpc.endpoints.values().chain(self.chains.iter().map(|c| &c.rpc_endpoint)) {
            require_secure(url)?;
        }
        require_secure(&self.intent_base_url()?)?;

        self.confirmation
            .validate()
            .map_err(|e| SendError::config(format!("confirmation: {}", e)))?;
        self.bridge
            .poll
            .validate()
            .map_err(|e| SendError::config(format!("bridge.poll: {}", e)))?;

        if self.bridge.bucket_secs == 0 {
            return Err(SendError::config("bridge.bucket_secs must be positive"));
        }
        if self.rpc.default_fee_limit == 0 {
            return Err(SendError::config("rpc.default_fee_limit must be positive"));
        }
        if self.device.address_timeout_secs == 0 || self.device.sign_timeout_secs == 0 {
            return Err(SendError::config("device timeouts must be positive"));
        }
        Ok(())
    }

    pub fn intent_base_url(&self) -> SendResult<Url> {
        parse_url("bridge.base_url", &self.bridge.base_url)
    }

    pub fn derivation_path(&self) -> SendResult<DerivationPath> {
        self.device.derivation_path.parse()
    }

    fn rpc_overrides(&self) -> SendResult<HashMap<ChainId, Url>> {
        self.rpc
            .endpoints
            .iter()
            .map(|(chain, url)| {
                let chain_id = chain
                    .trim()
                    .parse::<ChainId>()
                    .map_err(|_| SendError::config(format!("RPC override key '{}' is not a chain id", chain)))?;
                Ok((chain_id, url.clone()))
            })
            .collect()
    }

    pub fn registry(&self) -> SendResult<ChainRegistry> {
        ChainRegistry::with_overrides(&self.chains, &self.rpc_overrides()?)
    }

    pub fn http_timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            request: Duration::from_secs(self.rpc.request_timeout_secs),
            connect: Duration::from_secs(self.rpc.connect_timeout_secs),
        }
    }

    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            address: Duration::from_secs(self.device.address_timeout_secs),
            sign: Duration::from_secs(self.device.sign_timeout_secs),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            confirmation: self.confirmation,
            broadcast: BroadcastConfig {
                retry_delay: Duration::from_millis(self.rpc.broadcast_retry_delay_ms),
            },
            default_fee_limit: self.rpc.default_fee_limit,
        }
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            bucket_secs: self.bridge.bucket_secs,
            currency: self.bridge.currency.clone(),
            poll: self.bridge.poll,
            ..BridgeSettings::default()
        }
    }

    pub fn name_grammar(&self) -> NameGrammar {
        NameGrammar::new(&self.naming.suffixes)
    }

    /// Address cache location, `None` when caching is off or no home
    /// directory is known
    pub fn cache_path(&self) -> Option<PathBuf> {
        if !self.cache.enabled {
            return None;
        }
        self.cache
            .path
            .clone()
            .or_else(|| hwsend_home().map(|dir| dir.join("account.json")))
    }

    /// Bridge intent ledger location. Kept even when the address cache is
    /// off: without it a repeated bridge command cannot be recognised.
    pub fn ledger_path(&self) -> SendResult<PathBuf> {
        if let Some(path) = &self.bridge.ledger_path {
            return Ok(path.clone());
        }
        let dir = match self.cache.path.as_deref().and_then(Path::parent) {
            Some(parent) => Some(parent.to_path_buf()),
            None => hwsend_home(),
        };
        dir.map(|dir| dir.join("intents.json"))
            .ok_or_else(|| SendError::config(format!("No home directory; set {}", LEDGER_PATH_ENV)))
    }
}

fn hwsend_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".hwsend"))
}

fn parse_url(key: &str, value: &str) -> SendResult<Url> {
    Url::parse(value).map_err(|e| SendError::config(format!("{}: invalid URL: {}", key, e)))
}

fn is_local(url: &Url) -> bool {
    match url.host_str() {
        Some(host) => host == "localhost" || host == "127.0.0.1" || host == "[::1]",
        None => false,
    }
}

/// Remote endpoints must use TLS; plain HTTP is allowed for local nodes
fn require_secure(url: &Url) -> SendResult<()> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if is_local(url) => Ok(()),
        "http" => Err(SendError::config(format!(
            "HTTPS required for remote endpoint {}",
            url.host_str().unwrap_or_default()
        ))),
        other => Err(SendError::config(format!("Unsupported URL scheme: {}", other))),
    }
}
