//! Utilities Module
//!
//! Common utilities used across the crate.

pub mod backoff;
pub mod crypto;
pub mod http;
pub mod logging;

pub use backoff::BackoffPolicy;
pub use crypto::*;
pub use http::{build_client, HttpTimeouts};
