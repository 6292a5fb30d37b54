//! Coefficient-based fees used before the Galactica fee market.

use serde::{Deserialize, Serialize};

use super::{GasPriceCoefficient, Tiers};
use crate::blockchain::Amount;
use crate::errors::{FeeError, FeeResult};

/// Decimal places shown for a legacy fee.
pub const DISPLAY_DECIMALS: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasFee {
    /// VTHO rounded for display, e.g. `"0.21"`
    pub gas_fee: String,
    /// Exact fee in wei
    pub gas_raw: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasFeeTable {
    pub coefficient: GasPriceCoefficient,
    pub selected: GasFee,
    pub options: Tiers<GasFee>,
}

/// `(base * coefficient / 255 + base) * gas`, with integer division by 255.
pub fn gas_to_vtho(
    gas: u64,
    base_gas_price: u128,
    coefficient: GasPriceCoefficient,
) -> FeeResult<GasFee> {
    let overflow = || FeeError::InvalidAmount("Gas fee overflow".to_string());

    let tip = base_gas_price
        .checked_mul(coefficient.weight())
        .ok_or_else(overflow)?
        / 255;
    let gas_price = base_gas_price.checked_add(tip).ok_or_else(overflow)?;
    let gas_raw = gas_price
        .checked_mul(u128::from(gas))
        .ok_or_else(overflow)?;

    Ok(GasFee {
        gas_fee: Amount::from_wei(gas_raw).to_fixed(DISPLAY_DECIMALS),
        gas_raw,
    })
}

/// Fees for every tier plus the one currently selected.
pub fn gas_by_coefficient(
    gas: u64,
    base_gas_price: u128,
    coefficient: GasPriceCoefficient,
) -> FeeResult<GasFeeTable> {
    let options = Tiers::try_from_fn(|tier| gas_to_vtho(gas, base_gas_price, tier))?;
    Ok(GasFeeTable {
        coefficient,
        selected: options.get(coefficient).clone(),
        options,
    })
}
