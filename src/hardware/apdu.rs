//! Ledger Ethereum app APDU codec.
//!
//! Commands:
//! - `E0 02 00 00 <path>`: account address at a path
//! - `E0 04 00 00 <path || chunk>` then `E0 04 80 00 <chunk>`: sign a
//!   serialized transaction
//!
//! Legacy payloads end in the EIP-155 `chainId, 0, 0` items. The device
//! needs that tail inside a single chunk, so a chunk that would reach it
//! absorbs the remainder.

use async_trait::async_trait;
use ethers_core::types::Address;
use ethers_core::utils::rlp::Rlp;

use super::derivation_path::DerivationPath;
use super::transport::{DeviceTransport, RawSignature, TransportError};
use crate::utils::crypto::keccak256;

pub const CLA: u8 = 0xe0;
pub const INS_GET_ADDRESS: u8 = 0x02;
pub const INS_SIGN_TRANSACTION: u8 = 0x04;
pub const P1_FIRST_CHUNK: u8 = 0x00;
pub const P1_MORE_CHUNKS: u8 = 0x80;

/// Payload bytes per signing APDU
pub const MAX_CHUNK: usize = 150;

pub const SW_OK: u16 = 0x9000;
pub const SW_DENIED: u16 = 0x6985;
const SW_UNAVAILABLE: [u16; 4] = [0x6d00, 0x6e00, 0x5515, 0x6511];

/// One command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl ApduCommand {
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + self.data.len());
        bytes.extend_from_slice(&[CLA, self.ins, self.p1, self.p2, self.data.len() as u8]);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

pub fn get_address_command(path: &DerivationPath) -> ApduCommand {
    ApduCommand {
        ins: INS_GET_ADDRESS,
        p1: 0x00,
        p2: 0x00,
        data: path.to_apdu_bytes(),
    }
}

/// Offset where the EIP-155 tail starts, for legacy payloads that have one
pub fn vrs_offset(payload: &[u8]) -> Option<usize> {
    // typed payloads start with their type byte, not a list header
    if payload.first().map_or(true, |b| *b < 0xc0) {
        return None;
    }
    let rlp = Rlp::new(payload);
    let count = rlp.item_count().ok()?;
    if count <= 6 {
        return None;
    }
    let mut tail = 0;
    for i in count - 3..count {
        tail += rlp.at(i).ok()?.as_raw().len();
    }
    payload.len().checked_sub(tail)
}

/// Split a payload into chunks for a path of `path_len` encoded bytes
pub fn chunk_payload(payload: &[u8], path_len: usize) -> Vec<&[u8]> {
    let vrs = vrs_offset(payload);
    let mut chunks = Vec::new();
    let mut offset = 0;

    while offset < payload.len() {
        let max = if offset == 0 { MAX_CHUNK - path_len } else { MAX_CHUNK };
        let mut size = max.min(payload.len() - offset);
        if let Some(vrs) = vrs {
            if offset + size >= vrs {
                size = payload.len() - offset;
            }
        }
        chunks.push(&payload[offset..offset + size]);
        offset += size;
    }
    chunks
}

/// Signing APDUs for a payload
pub fn sign_commands(path: &DerivationPath, payload: &[u8]) -> Result<Vec<ApduCommand>, TransportError> {
    if payload.is_empty() {
        return Err(TransportError::Malformed("empty signing payload".to_string()));
    }
    let path_bytes = path.to_apdu_bytes();

    Ok(chunk_payload(payload, path_bytes.len())
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let (p1, data) = if i == 0 {
                let mut data = path_bytes.clone();
                data.extend_from_slice(chunk);
                (P1_FIRST_CHUNK, data)
            } else {
                (P1_MORE_CHUNKS, chunk.to_vec())
            };
            ApduCommand {
                ins: INS_SIGN_TRANSACTION,
                p1,
                p2: 0x00,
                data,
            }
        })
        .collect())
}

/// Map a status word onto the transport taxonomy
pub fn check_status(sw: u16) -> Result<(), TransportError> {
    match sw {
        SW_OK => Ok(()),
        SW_DENIED => Err(TransportError::UserDenied),
        sw if SW_UNAVAILABLE.contains(&sw) => Err(TransportError::Unavailable(format!(
            "Ethereum app is not open or the device is locked ({:#06x})",
            sw
        ))),
        sw => Err(TransportError::Status(sw)),
    }
}

/// `pubkey_len || pubkey || addr_len || ascii hex address [|| chain code]`
pub fn parse_address_response(data: &[u8]) -> Result<Address, TransportError> {
    let malformed = |what: &str| TransportError::Malformed(format!("address response: {}", what));

    let pk_len = *data.first().ok_or_else(|| malformed("empty"))? as usize;
    let public_key = data.get(1..1 + pk_len).ok_or_else(|| malformed("truncated public key"))?;
    let addr_len = *data.get(1 + pk_len).ok_or_else(|| malformed("missing address length"))? as usize;
    let ascii = data
        .get(2 + pk_len..2 + pk_len + addr_len)
        .ok_or_else(|| malformed("truncated address"))?;

    let text = std::str::from_utf8(ascii).map_err(|_| malformed("address is not ascii"))?;
    let raw = hex::decode(text.trim_start_matches("0x")).map_err(|_| malformed("address is not hex"))?;
    if raw.len() != 20 {
        return Err(malformed("address is not 20 bytes"));
    }
    let address = Address::from_slice(&raw);

    if public_key.len() == 65 && public_key[0] == 0x04 {
        let derived = Address::from_slice(&keccak256(&public_key[1..])[12..]);
        if derived != address {
            return Err(malformed("address does not match public key"));
        }
    }
    Ok(address)
}

/// `v || r || s`
pub fn parse_signature_response(data: &[u8]) -> Result<RawSignature, TransportError> {
    if data.len() < 65 {
        return Err(TransportError::Malformed(format!(
            "signature response is {} bytes, expected 65",
            data.len()
        )));
    }
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&data[1..33]);
    s.copy_from_slice(&data[33..65]);
    Ok(RawSignature { v: data[0], r, s })
}

/// Raw APDU exchange with a device
#[async_trait]
pub trait ApduExchange: Send + Sync {
    /// Send one command; returns response data and status word
    async fn exchange(&self, command: &[u8]) -> Result<(Vec<u8>, u16), TransportError>;

    async fn close(&self);
}

/// The Ethereum app spoken over any [`ApduExchange`]
pub struct EthereumApp<E> {
    exchange: E,
}

impl<E: ApduExchange> EthereumApp<E> {
    pub fn new(exchange: E) -> Self {
        Self { exchange }
    }

    async fn send(&self, command: &ApduCommand) -> Result<Vec<u8>, TransportError> {
        let (data, sw) = self.exchange.exchange(&command.encode()).await?;
        check_status(sw)?;
        Ok(data)
    }
}

#[async_trait]
impl<E: ApduExchange> DeviceTransport for EthereumApp<E> {
    async fn get_address(&self, path: &DerivationPath) -> Result<Address, TransportError> {
        let data = self.send(&get_address_command(path)).await?;
        parse_address_response(&data)
    }

    async fn sign_transaction(&self, path: &DerivationPath, payload: &[u8]) -> Result<RawSignature, TransportError> {
        let mut response = Vec::new();
        for command in sign_commands(path, payload)? {
            response = self.send(&command).await?;
        }
        parse_signature_response(&response)
    }

    async fn close(&self) {
        self.exchange.close().await;
    }
}
