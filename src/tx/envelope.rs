//! Transaction Envelopes
//!
//! Serialization of unsigned transactions for the signer, assembly of the
//! signed form, and decoding of signed bytes back into their fields.
//!
//! Legacy payloads carry EIP-155 replay protection (`chainId, 0, 0` in the
//! signing list); EIP-1559 payloads are `0x02 || rlp(...)`.

use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{
    Address, Bytes, Eip1559TransactionRequest, Signature, Transaction, TransactionRequest, H256, U256,
};
use ethers_core::utils::rlp;
use serde::Serialize;

use super::builder::UnsignedTransaction;
use crate::error::{SendError, SendResult};
use crate::types::{ChainId, SignatureMaterial, TxEnvelope};
use crate::utils::crypto::keccak256;

fn typed(tx: &UnsignedTransaction) -> SendResult<TypedTransaction> {
    let to = tx.to_address()?;
    let data = Bytes::from(tx.data.clone());

    Ok(match tx.envelope {
        TxEnvelope::Legacy => TransactionRequest::new()
            .to(to)
            .value(tx.value)
            .gas(tx.fee_limit)
            .gas_price(tx.fees.fee_per_unit)
            .nonce(tx.nonce)
            .data(data)
            .chain_id(tx.chain_id)
            .into(),
        TxEnvelope::Eip1559 => Eip1559TransactionRequest::new()
            .to(to)
            .value(tx.value)
            .gas(tx.fee_limit)
            .max_fee_per_gas(tx.fees.fee_per_unit)
            .max_priority_fee_per_gas(tx.fees.priority_fee_per_unit.unwrap_or_default())
            .nonce(tx.nonce)
            .data(data)
            .chain_id(tx.chain_id)
            .into(),
    })
}

/// Bytes the hardware signer is asked to sign
pub fn serialize_unsigned(tx: &UnsignedTransaction) -> SendResult<Vec<u8>> {
    Ok(typed(tx)?.rlp().to_vec())
}

/// Hash the signature commits to
pub fn signing_hash(tx: &UnsignedTransaction) -> SendResult<H256> {
    Ok(typed(tx)?.sighash())
}

/// `v` as it appears in the signed encoding
fn encoded_v(envelope: TxEnvelope, chain_id: ChainId, recovery_id: u8) -> u64 {
    match envelope {
        TxEnvelope::Legacy => chain_id * 2 + 35 + recovery_id as u64,
        TxEnvelope::Eip1559 => recovery_id as u64,
    }
}

fn to_signature(material: &SignatureMaterial, v: u64) -> Signature {
    Signature {
        r: U256::from_big_endian(material.r()),
        s: U256::from_big_endian(material.s()),
        v,
    }
}

/// A transaction with its signature applied, ready for broadcast
#[derive(Debug, Clone, Serialize)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub signature: SignatureMaterial,
    #[serde(with = "crate::serde_bytes::hex_vec")]
    raw: Vec<u8>,
    hash: H256,
}

impl SignedTransaction {
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    /// Transaction hash, keccak of the signed encoding
    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// Address the signature recovers to
    pub fn recover_signer(&self) -> SendResult<Address> {
        let sighash = signing_hash(&self.unsigned)?;
        to_signature(&self.signature, self.signature.recovery_id() as u64)
            .recover(sighash)
            .map_err(|e| SendError::device_communication(format!("Signature does not recover: {}", e)))
    }
}

/// Apply a signature to an unsigned transaction
pub fn assemble(unsigned: UnsignedTransaction, signature: SignatureMaterial) -> SendResult<SignedTransaction> {
    let v = encoded_v(unsigned.envelope, unsigned.chain_id, signature.recovery_id());
    let raw = typed(&unsigned)?.rlp_signed(&to_signature(&signature, v)).to_vec();
    let hash = H256::from(keccak256(&raw));

    Ok(SignedTransaction {
        unsigned,
        signature,
        raw,
        hash,
    })
}

/// Fields read back out of a signed encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedTransaction {
    pub envelope: TxEnvelope,
    pub chain_id: Option<ChainId>,
    pub nonce: U256,
    pub to: Option<Address>,
    pub value: U256,
    pub fee_limit: U256,
    pub fee_per_unit: Option<U256>,
    pub signer: Address,
    pub hash: H256,
}

/// Decode signed transaction bytes and recover the signer
pub fn decode_signed(raw: &[u8]) -> SendResult<DecodedTransaction> {
    if raw.is_empty() {
        return Err(SendError::internal("Empty signed transaction"));
    }
    let tx: Transaction = rlp::decode(raw)
        .map_err(|e| SendError::internal(format!("Malformed signed transaction: {}", e)))?;
    let signer = tx
        .recover_from()
        .map_err(|e| SendError::internal(format!("Signature does not recover: {}", e)))?;

    let envelope = match tx.transaction_type.map(|t| t.as_u64()) {
        Some(2) => TxEnvelope::Eip1559,
        _ => TxEnvelope::Legacy,
    };
    let fee_per_unit = match envelope {
        TxEnvelope::Legacy => tx.gas_price,
        TxEnvelope::Eip1559 => tx.max_fee_per_gas,
    };

    Ok(DecodedTransaction {
        envelope,
        chain_id: tx.chain_id.map(|c| c.as_u64()),
        nonce: tx.nonce,
        to: tx.to,
        value: tx.value,
        fee_limit: tx.gas,
        fee_per_unit,
        signer,
        hash: tx.hash,
    })
}
