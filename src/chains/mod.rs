//! Chain Registry
//!
//! Static per-chain parameters loaded once at startup. Non-EVM networks,
//! which have no native chain id, are keyed by their hardened SLIP-44
//! coin type so they never collide with EIP-155 ids.

pub mod registry;

pub use registry::{
    coin_types, ChainDescriptor, ChainRegistry, BASE_MAINNET, BASE_SEPOLIA, BITCOIN_MAINNET,
    BITCOIN_TESTNET, ETHEREUM_MAINNET, ETHEREUM_SEPOLIA,
};
