//! Address Encoding Strategies
//!
//! Pure functions keyed by [`AddressEncoding`]:
//! - `encode_record`: canonical record bytes from the naming service to the
//!   chain's display form
//! - `parse_native`: a user-typed native address to canonical bytes plus
//!   display form, with checksum / network validation

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address as BtcAddress, ScriptBuf};
use thiserror::Error;

use crate::types::{AddressEncoding, BitcoinNetwork};
use crate::utils::crypto::to_checksum_address;

pub const EVM_ADDRESS_LEN: usize = 20;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("expected {expected} address bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid EIP-55 checksum")]
    BadChecksum,

    #[error("address is not valid on {0:?}")]
    WrongNetwork(BitcoinNetwork),

    #[error("record is not a standard output script: {0}")]
    NonStandardScript(String),
}

/// Display form of canonical record bytes for a chain
pub fn encode_record(encoding: AddressEncoding, bytes: &[u8]) -> Result<String, EncodingError> {
    match encoding {
        AddressEncoding::Evm => {
            if bytes.len() != EVM_ADDRESS_LEN {
                return Err(EncodingError::WrongLength {
                    expected: EVM_ADDRESS_LEN,
                    actual: bytes.len(),
                });
            }
            Ok(to_checksum_address(bytes))
        }
        AddressEncoding::Bitcoin { network } => {
            let script = ScriptBuf::from_bytes(bytes.to_vec());
            BtcAddress::from_script(&script, network.network())
                .map(|address| address.to_string())
                .map_err(|e| EncodingError::NonStandardScript(e.to_string()))
        }
    }
}

/// Canonical bytes and display form of a native address string
pub fn parse_native(encoding: AddressEncoding, input: &str) -> Result<(Vec<u8>, String), EncodingError> {
    match encoding {
        AddressEncoding::Evm => parse_evm(input),
        AddressEncoding::Bitcoin { network } => parse_bitcoin(network, input),
    }
}

fn parse_evm(input: &str) -> Result<(Vec<u8>, String), EncodingError> {
    let trimmed = input.trim();

    if !trimmed.starts_with("0x") || trimmed.len() != 2 + 2 * EVM_ADDRESS_LEN {
        return Err(EncodingError::InvalidFormat(
            "expected 0x followed by 40 hex characters".to_string(),
        ));
    }

    let hex_part = &trimmed[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(EncodingError::InvalidFormat("invalid hex characters".to_string()));
    }

    let bytes = hex::decode(hex_part.to_lowercase())
        .map_err(|e| EncodingError::InvalidFormat(e.to_string()))?;
    let checksummed = to_checksum_address(&bytes);

    // All-lowercase or all-uppercase input carries no checksum
    let has_mixed_case = hex_part.chars().any(|c| c.is_ascii_uppercase())
        && hex_part.chars().any(|c| c.is_ascii_lowercase());
    if has_mixed_case && trimmed != checksummed {
        return Err(EncodingError::BadChecksum);
    }

    Ok((bytes, checksummed))
}

fn parse_bitcoin(network: BitcoinNetwork, input: &str) -> Result<(Vec<u8>, String), EncodingError> {
    let unchecked: BtcAddress<NetworkUnchecked> = input
        .trim()
        .parse()
        .map_err(|e: bitcoin::address::ParseError| EncodingError::InvalidFormat(e.to_string()))?;
    let address = unchecked
        .require_network(network.network())
        .map_err(|_| EncodingError::WrongNetwork(network))?;

    Ok((address.script_pubkey().to_bytes(), address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKSUMMED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn test_evm_record_encoding() {
        let bytes = hex::decode("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(encode_record(AddressEncoding::Evm, &bytes).unwrap(), CHECKSUMMED);
        assert_eq!(
            encode_record(AddressEncoding::Evm, &bytes[..19]).unwrap_err(),
            EncodingError::WrongLength { expected: 20, actual: 19 }
        );
    }

    #[test]
    fn test_evm_native_parsing() {
        let (bytes, display) = parse_native(AddressEncoding::Evm, CHECKSUMMED).unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(display, CHECKSUMMED);

        let (_, from_lower) = parse_native(AddressEncoding::Evm, &CHECKSUMMED.to_lowercase()).unwrap();
        assert_eq!(from_lower, CHECKSUMMED);
    }

    #[test]
    fn test_evm_bad_checksum() {
        let corrupted = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD";
        assert_eq!(
            parse_native(AddressEncoding::Evm, corrupted).unwrap_err(),
            EncodingError::BadChecksum
        );
    }

    #[test]
    fn test_evm_invalid_format() {
        assert!(parse_native(AddressEncoding::Evm, "0x1234").is_err());
        assert!(parse_native(AddressEncoding::Evm, "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_err());
        assert!(parse_native(AddressEncoding::Evm, "0xZZZeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_err());
    }

    #[test]
    fn test_bitcoin_record_roundtrip() {
        let encoding = AddressEncoding::Bitcoin { network: BitcoinNetwork::Mainnet };
        let address = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
        let (script, display) = parse_native(encoding, address).unwrap();
        assert_eq!(hex::encode(&script), "0014751e76e8199196d454941c45d1b3a323f1433bd6");
        assert_eq!(display, address);
        assert_eq!(encode_record(encoding, &script).unwrap(), address);
    }

    #[test]
    fn test_bitcoin_same_script_other_network() {
        let script = hex::decode("0014751e76e8199196d454941c45d1b3a323f1433bd6").unwrap();
        let testnet = AddressEncoding::Bitcoin { network: BitcoinNetwork::Testnet };
        assert_eq!(
            encode_record(testnet, &script).unwrap(),
            "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"
        );
    }

    #[test]
    fn test_bitcoin_wrong_network() {
        let testnet = AddressEncoding::Bitcoin { network: BitcoinNetwork::Testnet };
        assert_eq!(
            parse_native(testnet, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4").unwrap_err(),
            EncodingError::WrongNetwork(BitcoinNetwork::Testnet)
        );
    }

    #[test]
    fn test_bitcoin_nonstandard_record() {
        let encoding = AddressEncoding::Bitcoin { network: BitcoinNetwork::Mainnet };
        assert!(encode_record(encoding, &[0x6a, 0x01, 0x00]).is_err());
    }
}
