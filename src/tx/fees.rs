//! Fee Units and Quotes
//!
//! Fees are carried in wei everywhere inside the crate. User-facing values
//! are converted at the boundary with [`parse_fee`] / [`format_fee`], and
//! asset amounts with [`parse_amount`] / [`format_amount`].

use ethers_core::types::U256;
use ethers_core::utils::format_units;
use serde::Serialize;

use crate::chains::ChainDescriptor;
use crate::error::{SendError, SendResult};
use crate::rpc::{read_with_retry, ChainRpc};
use crate::types::{FeeUnit, TxEnvelope};

/// Gas for a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Fee values for one transaction, in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    /// gasPrice (legacy) or maxFeePerGas (EIP-1559)
    pub fee_per_unit: U256,
    /// maxPriorityFeePerGas, EIP-1559 only
    pub priority_fee_per_unit: Option<U256>,
}

impl FeeQuote {
    pub fn legacy(gas_price: U256) -> Self {
        Self {
            fee_per_unit: gas_price,
            priority_fee_per_unit: None,
        }
    }

    pub fn dynamic(max_fee: U256, priority_fee: U256) -> Self {
        Self {
            fee_per_unit: max_fee,
            priority_fee_per_unit: Some(priority_fee.min(max_fee)),
        }
    }

    /// Worst-case fee for `fee_limit` units
    pub fn max_cost(&self, fee_limit: u64) -> U256 {
        self.fee_per_unit.saturating_mul(U256::from(fee_limit))
    }
}

/// Quote fees from the chain.
///
/// Legacy chains use `eth_gasPrice`. EIP-1559 chains use the node's
/// priority fee suggestion and `2 * gasPrice + priority` as the cap, or
/// the caller's `max_fee` when given.
pub async fn quote(
    rpc: &dyn ChainRpc,
    chain: &ChainDescriptor,
    envelope: TxEnvelope,
    max_fee: Option<U256>,
) -> SendResult<FeeQuote> {
    match envelope {
        TxEnvelope::Legacy => match max_fee {
            Some(gas_price) => Ok(FeeQuote::legacy(gas_price)),
            None => {
                let gas_price = read_with_retry("eth_gasPrice", || rpc.gas_price(chain)).await?;
                Ok(FeeQuote::legacy(gas_price))
            }
        },
        TxEnvelope::Eip1559 => {
            let priority =
                read_with_retry("eth_maxPriorityFeePerGas", || rpc.max_priority_fee(chain)).await?;
            let cap = match max_fee {
                Some(cap) => cap,
                None => {
                    let gas_price = read_with_retry("eth_gasPrice", || rpc.gas_price(chain)).await?;
                    gas_price.saturating_mul(U256::from(2u8)).saturating_add(priority)
                }
            };
            Ok(FeeQuote::dynamic(cap, priority))
        }
    }
}

// =============================================================================
// Unit Conversion
// =============================================================================

/// Check `value` is a plain non-negative decimal with at most `decimals` places
fn validate_decimal(value: &str, decimals: u32, what: &str) -> SendResult<()> {
    let (whole, fraction) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };

    let digits_ok = !whole.is_empty()
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.chars().all(|c| c.is_ascii_digit())
        && !(value.contains('.') && fraction.is_empty());
    if !digits_ok {
        return Err(SendError::invalid_amount(format!("{} '{}' is not a decimal number", what, value)));
    }

    if fraction.len() as u32 > decimals {
        return Err(SendError::invalid_amount(format!(
            "{} '{}' has more than {} decimal places",
            what, value, decimals
        )));
    }
    Ok(())
}

/// Scale by string: the whole digits followed by the fraction padded to
/// `decimals` are the base-unit integer, and `from_dec_str` fails on
/// anything wider than 256 bits.
fn to_base_units(value: &str, decimals: u32, what: &str) -> SendResult<U256> {
    let trimmed = value.trim();
    validate_decimal(trimmed, decimals, what)?;
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    let digits = format!("{}{:0<width$}", whole, fraction, width = decimals as usize);
    U256::from_dec_str(&digits)
        .map_err(|_| SendError::invalid_amount(format!("{} '{}' does not fit in 256 bits", what, value)))
}

fn from_base_units(value: U256, decimals: u32) -> SendResult<String> {
    if decimals == 0 {
        return Ok(value.to_string());
    }
    let formatted = format_units(value, decimals)
        .map_err(|e| SendError::internal(format!("Unit conversion failed: {}", e)))?;
    Ok(trim_fraction(&formatted))
}

fn trim_fraction(formatted: &str) -> String {
    if !formatted.contains('.') {
        return formatted.to_string();
    }
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// User fee value in `unit` to wei
pub fn parse_fee(value: &str, unit: FeeUnit) -> SendResult<U256> {
    to_base_units(value, unit.decimals(), "Fee")
}

/// Wei to a decimal string in `unit`
pub fn format_fee(wei: U256, unit: FeeUnit) -> SendResult<String> {
    from_base_units(wei, unit.decimals())
}

/// Asset amount to base units for an asset with `decimals`
pub fn parse_amount(value: &str, decimals: u8) -> SendResult<U256> {
    to_base_units(value, decimals as u32, "Amount")
}

/// Base units to a decimal string
pub fn format_amount(value: U256, decimals: u8) -> SendResult<String> {
    from_base_units(value, decimals as u32)
}

/// Canonical decimal form, so `10.50` and `10.5` compare equal
pub fn normalize_decimal(value: &str, decimals: u8) -> SendResult<String> {
    format_amount(parse_amount(value, decimals)?, decimals)
}
