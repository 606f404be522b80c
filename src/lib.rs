//! hwsend Core Library
//!
//! Hardware-signed transfers across EVM chains, with an optional off-chain
//! bridge leg.
//!
//! # Architecture
//!
//! This crate provides:
//! - **chains**: Read-only registry of per-chain parameters
//! - **resolver**: Names and native addresses to a canonical [`ResolvedAddress`]
//! - **tx**: Unsigned transaction building, envelopes, broadcast and tracking
//! - **hardware**: Device transport, APDU codec and the signer session
//! - **pipeline**: The validate, build, sign, broadcast, track sequence
//! - **bridge**: Idempotent transfer intents paired with one on-chain leg
//! - **config**: TOML and environment configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use hwsend::{SendPipeline, SignerSession, TransferRequest};
//!
//! let address = session.connect().await?;
//! let pipeline = SendPipeline::new(registry, resolver, rpc, &session, settings);
//! let outcome = pipeline.send(&TransferRequest::new(84532, "alice.eth", "0.01")).await?;
//! println!("{}", outcome.explorer_url);
//! ```

pub mod bridge;
pub mod chains;
pub mod config;
pub mod error;
pub mod hardware;
pub mod pipeline;
pub mod resolver;
pub mod rpc;
pub mod serde_bytes;
pub mod tx;
pub mod types;
pub mod utils;

// Re-export key types for convenience
pub use error::{ErrorClass, ErrorCode, SendError, SendResult};
pub use types::*;

pub use bridge::{BridgeOrchestrator, BridgeOutcome, BridgeRequest, BridgeSettings, TransferIntent};
pub use chains::{ChainDescriptor, ChainRegistry};
pub use config::AppConfig;
pub use hardware::{DerivationPath, SessionState, SignerSession};
pub use pipeline::{PipelineSettings, SendOutcome, SendPipeline, TransferRequest};
pub use resolver::{NameService, Resolver};
pub use rpc::{ChainRpc, HttpChainRpc};
pub use tx::{SignedTransaction, UnsignedTransaction};

pub use utils::crypto::{keccak256, to_checksum_address};
