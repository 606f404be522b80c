//! Transaction Module
//!
//! Handles transaction building, serialization, broadcasting, and tracking.

pub mod broadcaster;
pub mod builder;
pub mod envelope;
pub mod fees;
pub mod tracker;

pub use broadcaster::{broadcast, broadcast_raw, BroadcastConfig};
pub use builder::{assemble_unsigned, TransactionBuilder, UnsignedTransaction};
pub use envelope::{assemble, decode_signed, serialize_unsigned, signing_hash, DecodedTransaction, SignedTransaction};
pub use fees::{FeeQuote, TRANSFER_GAS_LIMIT};
pub use tracker::{check_transaction, wait_for_confirmation, TransactionCheck, TxStatus};
