use serde::{Deserialize, Serialize};

use crate::blockchain::{Amount, Clause};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasSufficiency {
    pub is_gas: bool,
    /// VTHO transferred plus the fee, or transfers only when delegated
    pub tx_cost_total: Amount,
    pub gas_cost: Amount,
}

/// Whether `vtho_balance` covers the VTHO moved by `clauses` and, unless a
/// delegator pays, the transaction fee.
pub fn calculate_is_enough_gas(
    clauses: &[Clause],
    is_delegated: bool,
    vtho_balance: Amount,
    tx_fee: Amount,
) -> GasSufficiency {
    let transferred = clauses
        .iter()
        .filter_map(Clause::vtho_transfer_amount)
        .fold(0u128, |total, amount| total.saturating_add(amount.wei()));

    let total = if is_delegated {
        transferred
    } else {
        transferred.saturating_add(tx_fee.wei())
    };

    GasSufficiency {
        is_gas: vtho_balance.wei() >= total,
        tx_cost_total: Amount::from_wei(total),
        gas_cost: tx_fee,
    }
}
