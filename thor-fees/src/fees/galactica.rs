//! EIP-1559-style fee options for the Galactica fee market.
//!
//! A [`FeeSnapshot`] is built from one fee-history response and the node's
//! suggested priority fee; everything else here is a pure function of that
//! snapshot.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num::{BigInt, ToPrimitive};
use serde::{Deserialize, Serialize};

use super::{FeeOption, GasPriceCoefficient, Tiers};
use crate::api::types::FeeHistory;
use crate::blockchain::{parse_quantity, Amount};
use crate::blockchain_client::NodeApi;
use crate::errors::{FeeError, FeeResult};

pub const FEE_HISTORY_BLOCK_COUNT: u32 = 8;
pub const FEE_HISTORY_NEWEST_BLOCK: &str = "next";
pub const REWARD_PERCENTILES: [u8; 3] = [20, 40, 75];

/// How many samples back the ramp-up comparison looks.
pub const RAMP_LOOKBACK: usize = 4;
pub const RAMP_THRESHOLD_PERCENT: u32 = 5;
pub const PEAK_MAX_AGE_BLOCKS: usize = 5;
pub const PEAK_DROP_PERCENT: u32 = 2;
/// Blocks after a peak during which a drop does not disable speed change.
pub const PEAK_DROP_GRACE_BLOCKS: usize = 2;

/// Base-fee multiplier per tier as (mantissa, scale): 1.02, 1.03, 1.046.
fn base_fee_multiplier(coefficient: GasPriceCoefficient) -> BigDecimal {
    let (mantissa, scale) = match coefficient {
        GasPriceCoefficient::Regular => (102, 2),
        GasPriceCoefficient::Medium => (103, 2),
        GasPriceCoefficient::High => (1046, 3),
    };
    BigDecimal::new(BigInt::from(mantissa), scale)
}

/// Fee data for one block id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeSnapshot {
    /// Oldest first; the last entry is the base fee the next block will charge
    pub base_fees: Vec<u128>,
    /// Oldest first, sealed blocks only
    pub rewards: Vec<[u128; 3]>,
    pub max_priority_fee: u128,
}

impl FeeSnapshot {
    /// `Ok(None)` when the history carries no reward data.
    pub fn from_history(history: &FeeHistory, max_priority_fee: u128) -> FeeResult<Option<Self>> {
        let Some(reward) = history.reward.as_ref() else {
            return Ok(None);
        };
        if reward.is_empty() || history.base_fee_per_gas.is_empty() {
            return Ok(None);
        }

        let base_fees = history
            .base_fee_per_gas
            .iter()
            .map(|fee| parse_quantity(fee))
            .collect::<FeeResult<Vec<_>>>()?;

        // A row per base fee means the pending block was sampled too; it has
        // no rewards yet.
        let sealed = if reward.len() == base_fees.len() && reward.len() > 1 {
            &reward[..reward.len() - 1]
        } else {
            &reward[..]
        };
        let window_start = sealed
            .len()
            .saturating_sub(FEE_HISTORY_BLOCK_COUNT as usize);

        let rewards = sealed[window_start..]
            .iter()
            .map(|row| parse_reward_row(row))
            .collect::<FeeResult<Vec<_>>>()?;

        Ok(Some(FeeSnapshot {
            base_fees,
            rewards,
            max_priority_fee,
        }))
    }

    pub fn latest_base_fee(&self) -> u128 {
        self.base_fees.last().copied().unwrap_or_default()
    }

    /// Priority fee per gas for a tier, capped by the node's suggestion.
    pub fn priority_fee(&self, coefficient: GasPriceCoefficient) -> u128 {
        let index = match coefficient {
            GasPriceCoefficient::Regular => 0,
            GasPriceCoefficient::Medium => 1,
            GasPriceCoefficient::High => 2,
        };

        let reward = match self.rewards.last() {
            None => 0,
            Some(latest) if latest[0] == latest[1] && latest[1] == latest[2] => latest[index],
            Some(_) => average(self.rewards.iter().map(|row| row[index])),
        };
        reward.min(self.max_priority_fee)
    }

    /// Per-gas fees for every tier.
    pub fn per_gas_options(&self) -> FeeResult<Tiers<PerGasFee>> {
        let latest = self.latest_base_fee();
        Tiers::try_from_fn(|coefficient| {
            let priority = self.priority_fee(coefficient);
            let scaled_base = scale_base_fee(latest, coefficient)?;
            Ok(PerGasFee {
                estimated: checked_add(latest, priority)?,
                max: checked_add(scaled_base, priority)?,
                priority,
            })
        })
    }

    pub fn is_base_fee_ramping_up(&self) -> bool {
        is_base_fee_ramping_up(&self.base_fees)
    }

    pub fn speed_change_enabled(&self) -> bool {
        speed_change_enabled(&self.base_fees)
    }
}

fn parse_reward_row(row: &[String]) -> FeeResult<[u128; 3]> {
    if row.len() != REWARD_PERCENTILES.len() {
        return Err(FeeError::InvalidResponse(format!(
            "Expected {} reward percentiles, got {}",
            REWARD_PERCENTILES.len(),
            row.len()
        )));
    }
    Ok([
        parse_quantity(&row[0])?,
        parse_quantity(&row[1])?,
        parse_quantity(&row[2])?,
    ])
}

/// Floored mean.
fn average(values: impl Iterator<Item = u128>) -> u128 {
    let (sum, count) = values.fold((BigInt::from(0u8), 0u64), |(sum, count), v| {
        (sum + BigInt::from(v), count + 1)
    });
    if count == 0 {
        return 0;
    }
    (sum / BigInt::from(count)).to_u128().unwrap_or(u128::MAX)
}

fn scale_base_fee(base_fee: u128, coefficient: GasPriceCoefficient) -> FeeResult<u128> {
    let scaled = BigDecimal::new(BigInt::from(base_fee), 0) * base_fee_multiplier(coefficient);
    let (whole, _) = scaled.with_scale(0).as_bigint_and_exponent();
    whole
        .to_u128()
        .ok_or_else(|| FeeError::InvalidAmount("Scaled base fee overflow".to_string()))
}

fn checked_add(a: u128, b: u128) -> FeeResult<u128> {
    a.checked_add(b)
        .ok_or_else(|| FeeError::InvalidAmount("Fee overflow".to_string()))
}

/// `(current - previous) / previous` strictly above `percent`.
fn rose_more_than(previous: u128, current: u128, percent: u32) -> bool {
    if current <= previous {
        return false;
    }
    if previous == 0 {
        return true;
    }
    BigInt::from(current - previous) * 100 > BigInt::from(previous) * percent
}

/// `(peak - current) / peak` strictly above `percent`.
fn fell_more_than(peak: u128, current: u128, percent: u32) -> bool {
    if current >= peak {
        return false;
    }
    BigInt::from(peak - current) * 100 > BigInt::from(peak) * percent
}

fn ramp_at(base_fees: &[u128], index: usize) -> bool {
    index >= RAMP_LOOKBACK
        && rose_more_than(
            base_fees[index - RAMP_LOOKBACK],
            base_fees[index],
            RAMP_THRESHOLD_PERCENT,
        )
}

/// Latest base fee more than 5% above the one four samples earlier.
pub fn is_base_fee_ramping_up(base_fees: &[u128]) -> bool {
    match base_fees.len() {
        0 => false,
        len => ramp_at(base_fees, len - 1),
    }
}

/// Whether the UI should offer a faster tier.
///
/// A ramp, or a fee above every earlier sample, marks a peak and enables it.
/// It stays on until the peak is more than [`PEAK_MAX_AGE_BLOCKS`] old, or
/// the fee is more than [`PEAK_DROP_PERCENT`] below the peak once
/// [`PEAK_DROP_GRACE_BLOCKS`] have passed.
pub fn speed_change_enabled(base_fees: &[u128]) -> bool {
    let mut peak: Option<(usize, u128)> = None;
    let mut highest = match base_fees.first() {
        Some(first) => *first,
        None => return false,
    };

    for (index, fee) in base_fees.iter().copied().enumerate().skip(1) {
        let new_high = fee > highest;
        highest = highest.max(fee);

        if new_high || ramp_at(base_fees, index) {
            peak = match peak {
                Some((_, value)) if value > fee => peak,
                _ => Some((index, fee)),
            };
            continue;
        }

        if let Some((peak_index, peak_fee)) = peak {
            let age = index - peak_index;
            if age > PEAK_MAX_AGE_BLOCKS
                || (age > PEAK_DROP_GRACE_BLOCKS
                    && fell_more_than(peak_fee, fee, PEAK_DROP_PERCENT))
            {
                peak = None;
            }
        }
    }

    peak.is_some()
}

/// Per-gas values for one tier, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerGasFee {
    pub estimated: u128,
    pub max: u128,
    pub priority: u128,
}

/// Values handed to the transaction builder, as decimal wei strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxFeeOption {
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalacticaFees {
    /// Totals for the estimated gas
    pub options: Option<Tiers<FeeOption>>,
    pub tx_options: Option<Tiers<TxFeeOption>>,
    pub max_priority_fee: Amount,
    pub is_base_fee_ramping_up: bool,
    pub speed_change_enabled: bool,
    pub is_loading: bool,
    /// Loading with no earlier data to show
    pub is_first_time_loading: bool,
    pub data_updated_at: Option<DateTime<Utc>>,
}

impl GalacticaFees {
    /// Nothing to show: fee market inactive, or no data yet.
    pub fn empty(is_loading: bool) -> Self {
        GalacticaFees {
            options: None,
            tx_options: None,
            max_priority_fee: Amount::ZERO,
            is_base_fee_ramping_up: false,
            speed_change_enabled: false,
            is_loading,
            is_first_time_loading: is_loading,
            data_updated_at: None,
        }
    }

    pub fn from_snapshot(
        snapshot: &FeeSnapshot,
        gas: u64,
        data_updated_at: DateTime<Utc>,
    ) -> FeeResult<Self> {
        let per_gas = snapshot.per_gas_options()?;
        let gas = u128::from(gas);
        let total = |value: u128| -> FeeResult<Amount> {
            value
                .checked_mul(gas)
                .map(Amount::from_wei)
                .ok_or_else(|| FeeError::InvalidAmount("Fee total overflow".to_string()))
        };

        let options = Tiers::try_from_fn(|coefficient| {
            let fee = per_gas.get(coefficient);
            Ok::<_, FeeError>(FeeOption {
                estimated_fee: total(fee.estimated)?,
                max_fee: total(fee.max)?,
                priority_fee: total(fee.priority)?,
            })
        })?;

        let tx_options = per_gas.map(|fee| TxFeeOption {
            max_fee_per_gas: fee.max.to_string(),
            max_priority_fee_per_gas: fee.priority.to_string(),
        });

        Ok(GalacticaFees {
            options: Some(options),
            tx_options: Some(tx_options),
            max_priority_fee: Amount::from_wei(snapshot.max_priority_fee),
            is_base_fee_ramping_up: snapshot.is_base_fee_ramping_up(),
            speed_change_enabled: snapshot.speed_change_enabled(),
            is_loading: false,
            is_first_time_loading: false,
            data_updated_at: Some(data_updated_at),
        })
    }
}

/// Fetch the priority fee and fee history concurrently.
pub async fn fetch_snapshot(node: &dyn NodeApi) -> FeeResult<Option<FeeSnapshot>> {
    let (max_priority_fee, history) = tokio::try_join!(
        node.max_priority_fee(),
        node.fee_history(
            FEE_HISTORY_BLOCK_COUNT,
            FEE_HISTORY_NEWEST_BLOCK,
            &REWARD_PERCENTILES
        ),
    )?;

    let snapshot = FeeSnapshot::from_history(&history, max_priority_fee)?;
    if snapshot.is_none() {
        log::warn!("fee history carried no rewards");
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GWEI: u128 = 1_000_000_000;

    fn hex(value: u128) -> String {
        format!("0x{:x}", value)
    }

    fn fixture_history(base_fees: &[u128]) -> FeeHistory {
        let mut reward: Vec<Vec<String>> = (0..8).map(|_| vec![hex(10), hex(20), hex(30)]).collect();
        reward.push(vec!["0x0".into(), "0x0".into(), "0x0".into()]);
        FeeHistory {
            oldest_block: Some("0x1".into()),
            base_fee_per_gas: base_fees.iter().map(|f| hex(*f)).collect(),
            gas_used_ratio: vec![0.5; 9],
            reward: Some(reward),
        }
    }

    fn snapshot(base_fees: &[u128]) -> FeeSnapshot {
        FeeSnapshot::from_history(&fixture_history(base_fees), GWEI / 20)
            .unwrap()
            .unwrap()
    }

    /// `len` fees starting at 1 gwei, each 2% above the previous.
    fn rising(len: usize) -> Vec<u128> {
        let mut fees = vec![GWEI];
        while fees.len() < len {
            let last = *fees.last().unwrap();
            fees.push(last * 102 / 100);
        }
        fees
    }

    #[test]
    fn constant_base_fee_fixture() {
        let snapshot = snapshot(&[GWEI; 9]);
        let fees = GalacticaFees::from_snapshot(&snapshot, 21_000, Utc::now()).unwrap();
        let options = fees.options.unwrap();

        assert!(!fees.is_base_fee_ramping_up);
        assert!(!fees.speed_change_enabled);
        assert!(!fees.is_loading);
        assert!(!fees.is_first_time_loading);
        assert_eq!(options.regular.estimated_fee.wei(), 21_000_000_210_000);
        assert_eq!(options.regular.max_fee.wei(), 21_420_000_210_000);
        assert_eq!(options.regular.priority_fee.wei(), 210_000);
        assert_eq!(options.medium.max_fee.wei(), 21_630_000_420_000);
        assert_eq!(options.high.max_fee.wei(), 21_966_000_630_000);
        assert_eq!(fees.max_priority_fee.wei(), 50_000_000);

        let tx = fees.tx_options.unwrap();
        assert_eq!(tx.regular.max_fee_per_gas, "1020000010");
        assert_eq!(tx.medium.max_fee_per_gas, "1030000020");
        assert_eq!(tx.high.max_fee_per_gas, "1046000030");
        assert_eq!(tx.high.max_priority_fee_per_gas, "30");
    }

    #[test]
    fn latest_base_fee_comes_from_pending_block() {
        let mut base_fees = vec![0u128; 8];
        base_fees.push(GWEI);
        let snapshot = snapshot(&base_fees);
        let fees = GalacticaFees::from_snapshot(&snapshot, 21_000, Utc::now()).unwrap();

        assert_eq!(
            fees.options.unwrap().regular.estimated_fee.wei(),
            21_000_000_210_000
        );
        assert!(fees.is_base_fee_ramping_up);
        assert!(fees.speed_change_enabled);
    }

    #[test]
    fn estimated_fee_is_base_plus_priority() {
        let snapshot = snapshot(&rising(9));
        let per_gas = snapshot.per_gas_options().unwrap();
        for (coefficient, fee) in per_gas.iter() {
            assert_eq!(fee.estimated, snapshot.latest_base_fee() + fee.priority);
            assert!(fee.priority <= snapshot.max_priority_fee, "{}", coefficient);
        }
    }

    #[test]
    fn priority_fee_is_capped_by_node_suggestion() {
        let mut history = fixture_history(&[GWEI; 9]);
        history.reward = Some(vec![vec![hex(GWEI), hex(2 * GWEI), hex(3 * GWEI)]; 8]);
        let snapshot = FeeSnapshot::from_history(&history, GWEI + GWEI / 2)
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.priority_fee(GasPriceCoefficient::Regular), GWEI);
        assert_eq!(
            snapshot.priority_fee(GasPriceCoefficient::Medium),
            GWEI + GWEI / 2
        );
        assert_eq!(
            snapshot.priority_fee(GasPriceCoefficient::High),
            GWEI + GWEI / 2
        );
    }

    #[test]
    fn equal_latest_rewards_are_used_verbatim() {
        let mut history = fixture_history(&[GWEI; 9]);
        let mut rows: Vec<Vec<String>> = (0..7).map(|_| vec![hex(100), hex(200), hex(300)]).collect();
        rows.push(vec![hex(7), hex(7), hex(7)]);
        history.reward = Some(rows);

        let snapshot = FeeSnapshot::from_history(&history, GWEI).unwrap().unwrap();
        for coefficient in GasPriceCoefficient::ALL {
            assert_eq!(snapshot.priority_fee(coefficient), 7);
        }
    }

    #[test]
    fn unequal_rewards_are_averaged_and_floored() {
        let mut history = fixture_history(&[GWEI; 9]);
        let mut rows: Vec<Vec<String>> = (0..7).map(|_| vec![hex(10), hex(20), hex(30)]).collect();
        rows.push(vec![hex(11), hex(21), hex(33)]);
        history.reward = Some(rows);

        let snapshot = FeeSnapshot::from_history(&history, GWEI).unwrap().unwrap();
        // (7 * 10 + 11) / 8 = 10.125
        assert_eq!(snapshot.priority_fee(GasPriceCoefficient::Regular), 10);
        // (7 * 30 + 33) / 8 = 30.375
        assert_eq!(snapshot.priority_fee(GasPriceCoefficient::High), 30);
    }

    #[test]
    fn missing_rewards_mean_no_data() {
        let mut history = fixture_history(&[GWEI; 9]);
        history.reward = None;
        assert_eq!(FeeSnapshot::from_history(&history, GWEI).unwrap(), None);

        history.reward = Some(Vec::new());
        assert_eq!(FeeSnapshot::from_history(&history, GWEI).unwrap(), None);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        let mut history = fixture_history(&[GWEI; 9]);
        history.reward = Some(vec![vec![hex(1), hex(2)]]);
        assert!(matches!(
            FeeSnapshot::from_history(&history, GWEI),
            Err(FeeError::InvalidResponse(_))
        ));

        history.base_fee_per_gas = vec!["0xzz".into()];
        assert!(FeeSnapshot::from_history(&history, GWEI).is_err());
    }

    #[test]
    fn ramp_up_boundary() {
        let at_five_percent = [100_000_000, 0, 0, 0, 105_000_000];
        assert!(!is_base_fee_ramping_up(&at_five_percent));

        let just_above = [100_000_000, 0, 0, 0, 105_000_001];
        assert!(is_base_fee_ramping_up(&just_above));

        assert!(!is_base_fee_ramping_up(&[1, 2, 3]));
        assert!(!is_base_fee_ramping_up(&[]));
    }

    #[test]
    fn ramp_compares_four_samples_back() {
        // 8 samples: latest against index 3
        let mut fees = vec![GWEI; 8];
        fees[3] = GWEI / 2;
        assert!(is_base_fee_ramping_up(&fees));
        fees[3] = GWEI;
        fees[2] = GWEI / 2;
        assert!(!is_base_fee_ramping_up(&fees));
    }

    #[test]
    fn steady_rise_enables_speed_change() {
        assert!(speed_change_enabled(&rising(8)));
        assert!(!speed_change_enabled(&[GWEI; 8]));
    }

    #[test]
    fn speed_change_survives_small_dip() {
        let mut fees = rising(6);
        let peak = *fees.last().unwrap();
        fees.push(peak * 99 / 100);
        fees.push(peak * 99 / 100);
        assert!(!is_base_fee_ramping_up(&fees));
        assert!(speed_change_enabled(&fees));
    }

    /// Eight samples rising 2% per block, the last `falling` of them
    /// replaced by drops of `drop_per_mille`.
    fn rise_then_fall(falling: usize, drop_per_mille: u128) -> Vec<u128> {
        let mut fees = rising((8 - falling).max(1));
        while fees.len() < 8 {
            let last = *fees.last().unwrap();
            fees.push(last * (1000 - drop_per_mille) / 1000);
        }
        fees
    }

    #[test]
    fn speed_change_follows_recent_peak() {
        let cases = [
            (0, 125, true),
            (1, 125, true),
            (2, 125, true),
            (3, 125, false),
            (4, 125, false),
            (5, 125, false),
            (6, 125, false),
            (7, 125, false),
            (8, 125, false),
            (5, 1, true),
        ];
        for (falling, drop_per_mille, expected) in cases {
            let fees = rise_then_fall(falling, drop_per_mille);
            assert_eq!(fees.len(), 8);
            assert_eq!(
                speed_change_enabled(&fees),
                expected,
                "{} falling blocks of {} per mille",
                falling,
                drop_per_mille
            );
        }
    }

    #[test]
    fn speed_change_disables_after_sustained_drop() {
        let mut fees = rising(5);
        let peak = *fees.last().unwrap();
        fees.push(peak * 875 / 1000);
        fees.push(peak * 875 / 1000);
        assert!(speed_change_enabled(&fees));
        fees.push(peak * 875 / 1000);
        assert!(!speed_change_enabled(&fees));
    }

    #[test]
    fn speed_change_expires_after_peak_ages_out() {
        // A 10% step ramps at indices 4..=7, so the peak settles at index 7.
        let high = GWEI * 11 / 10;
        let mut fees = vec![GWEI; 4];
        fees.extend(std::iter::repeat(high).take(9));
        assert!(speed_change_enabled(&fees));
        fees.push(high);
        assert!(!speed_change_enabled(&fees));
    }

    #[test]
    fn harmonic_fees_do_not_enable_speed_change() {
        let factors = [102u128, 98, 98, 102, 102, 98, 98];
        let mut fees = vec![GWEI];
        for factor in factors {
            let last = *fees.last().unwrap();
            fees.push(last * factor / 100);
        }
        assert!(!speed_change_enabled(&fees));
    }

    #[test]
    fn empty_fees_have_no_options() {
        let fees = GalacticaFees::empty(true);
        assert!(fees.options.is_none());
        assert!(fees.is_loading);
        assert!(fees.is_first_time_loading);
        assert!(!GalacticaFees::empty(false).is_first_time_loading);
        assert_eq!(fees.max_priority_fee, Amount::ZERO);
    }
}
