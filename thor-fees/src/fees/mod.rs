//! Gas estimation and fee calculation.

pub mod estimator;
pub mod galactica;
pub mod legacy;
pub mod sufficiency;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::blockchain::Amount;

pub use estimator::{estimate_gas, intrinsic_gas, EstimateGasResult, GasEstimator, Revision};
pub use galactica::{FeeSnapshot, GalacticaFees, TxFeeOption};
pub use legacy::{gas_by_coefficient, gas_to_vtho, GasFee, GasFeeTable};
pub use sufficiency::{calculate_is_enough_gas, GasSufficiency};

/// Fee urgency tier.
///
/// The discriminant is the legacy byte-range coefficient applied on top of
/// the base gas price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GasPriceCoefficient {
    Regular = 0,
    Medium = 127,
    High = 255,
}

impl GasPriceCoefficient {
    pub const ALL: [GasPriceCoefficient; 3] = [
        GasPriceCoefficient::Regular,
        GasPriceCoefficient::Medium,
        GasPriceCoefficient::High,
    ];

    pub fn weight(self) -> u128 {
        self as u8 as u128
    }
}

impl fmt::Display for GasPriceCoefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GasPriceCoefficient::Regular => "REGULAR",
            GasPriceCoefficient::Medium => "MEDIUM",
            GasPriceCoefficient::High => "HIGH",
        };
        f.write_str(name)
    }
}

/// One value per [`GasPriceCoefficient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tiers<T> {
    pub regular: T,
    pub medium: T,
    pub high: T,
}

impl<T> Tiers<T> {
    pub fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut(GasPriceCoefficient) -> T,
    {
        Tiers {
            regular: f(GasPriceCoefficient::Regular),
            medium: f(GasPriceCoefficient::Medium),
            high: f(GasPriceCoefficient::High),
        }
    }

    pub fn try_from_fn<F, E>(mut f: F) -> Result<Self, E>
    where
        F: FnMut(GasPriceCoefficient) -> Result<T, E>,
    {
        Ok(Tiers {
            regular: f(GasPriceCoefficient::Regular)?,
            medium: f(GasPriceCoefficient::Medium)?,
            high: f(GasPriceCoefficient::High)?,
        })
    }

    pub fn get(&self, coefficient: GasPriceCoefficient) -> &T {
        match coefficient {
            GasPriceCoefficient::Regular => &self.regular,
            GasPriceCoefficient::Medium => &self.medium,
            GasPriceCoefficient::High => &self.high,
        }
    }

    pub fn map<U, F>(&self, mut f: F) -> Tiers<U>
    where
        F: FnMut(&T) -> U,
    {
        Tiers {
            regular: f(&self.regular),
            medium: f(&self.medium),
            high: f(&self.high),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GasPriceCoefficient, &T)> {
        GasPriceCoefficient::ALL
            .into_iter()
            .map(move |coefficient| (coefficient, self.get(coefficient)))
    }
}

/// Fees for one tier, either per gas or multiplied by a gas amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeOption {
    pub estimated_fee: Amount,
    pub max_fee: Amount,
    pub priority_fee: Amount,
}
