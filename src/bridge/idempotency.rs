//! Idempotency keys for transfer intents.
//!
//! The key is a v4-layout UUID taken from
//! `sha256(source|chain|destination|amount|bucket)`, so the same logical
//! request inside one time bucket always maps to the same key.

use chrono::{DateTime, Utc};
use uuid::{Builder, Uuid};

use crate::types::ChainId;
use crate::utils::crypto::sha256;

pub const DEFAULT_BUCKET_SECS: u64 = 300;

/// Bucket index of `now` for buckets of `bucket_secs`
pub fn time_bucket(now: DateTime<Utc>, bucket_secs: u64) -> u64 {
    now.timestamp().max(0) as u64 / bucket_secs.max(1)
}

/// `destination` is the canonical address bytes, `amount` the normalized decimal
pub fn idempotency_key(
    source_wallet: &str,
    destination_chain: ChainId,
    destination: &[u8],
    amount: &str,
    bucket: u64,
) -> Uuid {
    let material = format!(
        "{}|{}|{}|{}|{}",
        source_wallet.trim(),
        destination_chain,
        hex::encode(destination),
        amount,
        bucket
    );
    let digest = sha256(material.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Builder::from_random_bytes(bytes).into_uuid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_same_inputs_same_key() {
        let a = idempotency_key("wallet-1", 84532, &[0xab; 20], "10.5", 42);
        let b = idempotency_key(" wallet-1 ", 84532, &[0xab; 20], "10.5", 42);
        assert_eq!(a, b);
        assert_eq!(a.get_version_num(), 4);
    }

    #[test]
    fn test_any_input_changes_key() {
        let base = idempotency_key("wallet-1", 84532, &[0xab; 20], "10.5", 42);
        assert_ne!(base, idempotency_key("wallet-2", 84532, &[0xab; 20], "10.5", 42));
        assert_ne!(base, idempotency_key("wallet-1", 11155111, &[0xab; 20], "10.5", 42));
        assert_ne!(base, idempotency_key("wallet-1", 84532, &[0xac; 20], "10.5", 42));
        assert_ne!(base, idempotency_key("wallet-1", 84532, &[0xab; 20], "10.6", 42));
        assert_ne!(base, idempotency_key("wallet-1", 84532, &[0xab; 20], "10.5", 43));
    }

    #[test]
    fn test_time_bucket() {
        let t0 = Utc.timestamp_opt(1_700_000_100, 0).unwrap();
        let t1 = Utc.timestamp_opt(1_700_000_199, 0).unwrap();
        let t2 = Utc.timestamp_opt(1_700_000_400, 0).unwrap();
        assert_eq!(time_bucket(t0, 300), time_bucket(t1, 300));
        assert_ne!(time_bucket(t0, 300), time_bucket(t2, 300));
        assert_eq!(time_bucket(t0, 0), 1_700_000_100);
    }
}
