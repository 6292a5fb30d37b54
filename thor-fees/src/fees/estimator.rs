//! Gas estimation through clause simulation on a Thor node.

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::api::types::{BestBlock, CallOutput, CallRequest};
use crate::blockchain::{parse_quantity, to_hex_word, Address, Clause};
use crate::blockchain_client::NodeApi;
use crate::errors::{FeeError, FeeResult};

pub const TX_GAS: u64 = 5_000;
pub const CLAUSE_GAS: u64 = 16_000;
pub const CLAUSE_GAS_CONTRACT_CREATION: u64 = 48_000;
pub const ZERO_BYTE_GAS: u64 = 4;
pub const NON_ZERO_BYTE_GAS: u64 = 68;

/// Gas offered to the simulation when the caller has not fixed a limit.
pub const DEFAULT_OFFERED_GAS: u64 = 2_000 * 10_000;

/// Added on top of intrinsic + execution gas for an unspecified limit.
pub const EXECUTION_GAS_MARGIN: u64 = 15_000;

/// Base gas price used unless a live lookup is configured.
pub const DEFAULT_BASE_GAS_PRICE: u128 = 10_000_000_000_000;

/// First node release whose simulation semantics need the `next` revision.
pub const DEFAULT_MIN_NEXT_REVISION_VERSION: Version = Version::new(2, 3, 0);

const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];
/// `get(bytes32)` on the `Params` contract
const PARAMS_GET_SELECTOR: [u8; 4] = [0x8e, 0xaa, 0x6a, 0xc0];

/// Revision to run the simulation against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    Best,
    Next,
}

impl Revision {
    pub fn as_str(self) -> &'static str {
        match self {
            Revision::Best => "best",
            Revision::Next => "next",
        }
    }

    /// `next` for nodes at or above `min_version`, `best` otherwise or when the
    /// version is unknown.
    pub fn for_node_version(node_version: Option<&str>, min_version: &Version) -> Self {
        let parsed = node_version
            .map(|v| v.trim().trim_start_matches('v'))
            .and_then(|v| Version::parse(v).ok());

        match parsed {
            Some(version) if version >= *min_version => Revision::Next,
            _ => Revision::Best,
        }
    }
}

/// Where the base gas price comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "value")]
pub enum BaseGasPriceSource {
    Fixed(u128),
    /// Read `base-gas-price` from the `Params` contract
    Params,
}

impl Default for BaseGasPriceSource {
    fn default() -> Self {
        BaseGasPriceSource::Fixed(DEFAULT_BASE_GAS_PRICE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateGasResult {
    pub caller: Address,
    pub gas: u64,
    pub reverted: bool,
    pub revert_reason: String,
    pub vm_error: String,
    /// 32-byte `0x` hex word
    pub base_gas_price: String,
}

impl EstimateGasResult {
    pub fn base_gas_price_wei(&self) -> FeeResult<u128> {
        parse_quantity(&self.base_gas_price)
    }
}

/// Gas charged before any clause executes.
pub fn intrinsic_gas(clauses: &[Clause]) -> u64 {
    if clauses.is_empty() {
        return TX_GAS + CLAUSE_GAS;
    }

    clauses.iter().fold(TX_GAS, |total, clause| {
        let clause_gas = if clause.is_contract_creation() {
            CLAUSE_GAS_CONTRACT_CREATION
        } else {
            CLAUSE_GAS
        };
        total + clause_gas + data_gas(&clause.data)
    })
}

fn data_gas(data: &[u8]) -> u64 {
    data.iter()
        .map(|b| {
            if *b == 0 {
                ZERO_BYTE_GAS
            } else {
                NON_ZERO_BYTE_GAS
            }
        })
        .sum()
}

/// Decode `Error(string)` / `Panic(uint256)` revert data.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }

    let (selector, body) = data.split_at(4);
    if selector == ERROR_STRING_SELECTOR {
        if body.len() < 64 {
            return None;
        }
        let length = word_to_u64(&body[32..64])? as usize;
        let text = body.get(64..64usize.checked_add(length)?)?;
        return Some(String::from_utf8_lossy(text).into_owned());
    }

    if selector == PANIC_SELECTOR && body.len() >= 32 {
        let code = word_to_u64(&body[..32])?;
        return Some(format!("Panic(0x{:02x})", code));
    }

    None
}

fn word_to_u64(word: &[u8]) -> Option<u64> {
    if word.len() != 32 || word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    Some(u64::from_be_bytes(tail))
}

fn word_to_u128(word: &[u8]) -> Option<u128> {
    if word.len() < 32 || word[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut tail = [0u8; 16];
    tail.copy_from_slice(&word[16..32]);
    Some(u128::from_be_bytes(tail))
}

fn base_gas_price_call() -> Clause {
    let key = b"base-gas-price";
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&PARAMS_GET_SELECTOR);
    data.extend(std::iter::repeat(0u8).take(32 - key.len()));
    data.extend_from_slice(key);
    Clause::call(Address::params(), data)
}

/// Simulates clauses on a node to size the gas limit.
pub struct GasEstimator<'a> {
    node: &'a dyn NodeApi,
    min_next_revision: Version,
    base_gas_price: BaseGasPriceSource,
}

impl<'a> GasEstimator<'a> {
    pub fn new(node: &'a dyn NodeApi) -> Self {
        Self {
            node,
            min_next_revision: DEFAULT_MIN_NEXT_REVISION_VERSION,
            base_gas_price: BaseGasPriceSource::default(),
        }
    }

    pub fn with_min_next_revision(mut self, version: Version) -> Self {
        self.min_next_revision = version;
        self
    }

    pub fn with_base_gas_price(mut self, source: BaseGasPriceSource) -> Self {
        self.base_gas_price = source;
        self
    }

    /// Estimate the gas for `clauses` sent by `caller`.
    ///
    /// `provided_gas` of zero means no limit has been chosen yet.
    pub async fn estimate(
        &self,
        clauses: &[Clause],
        provided_gas: u64,
        caller: Address,
        gas_payer: Option<Address>,
    ) -> FeeResult<EstimateGasResult> {
        let best = self.node.best_block().await?;
        self.estimate_at(&best, clauses, provided_gas, caller, gas_payer)
            .await
    }

    /// Like [`GasEstimator::estimate`], choosing the revision from an
    /// already fetched best block.
    pub async fn estimate_at(
        &self,
        best: &BestBlock,
        clauses: &[Clause],
        provided_gas: u64,
        caller: Address,
        gas_payer: Option<Address>,
    ) -> FeeResult<EstimateGasResult> {
        let intrinsic = intrinsic_gas(clauses);
        let revision =
            Revision::for_node_version(best.node_version.as_deref(), &self.min_next_revision);

        let offered_gas = if provided_gas > 0 {
            provided_gas.saturating_sub(intrinsic).max(1)
        } else {
            DEFAULT_OFFERED_GAS
        };

        let request = CallRequest {
            clauses: clauses.to_vec(),
            caller,
            gas: offered_gas,
            gas_payer,
        };
        let outputs = self.node.inspect_clauses(&request, revision.as_str()).await?;
        let execution_gas: u64 = outputs.iter().map(|o| o.gas_used).sum();

        let gas = if provided_gas > 0 {
            provided_gas
        } else if execution_gas > 0 {
            intrinsic + execution_gas + EXECUTION_GAS_MARGIN
        } else {
            intrinsic
        };

        let last = outputs.last().cloned().unwrap_or_default();
        let revert_reason = revert_reason(&last);
        log::debug!(
            "estimated gas {} (intrinsic {}, execution {}, revision {})",
            gas,
            intrinsic,
            execution_gas,
            revision.as_str()
        );

        Ok(EstimateGasResult {
            caller,
            gas,
            reverted: last.reverted,
            revert_reason,
            vm_error: last.vm_error,
            base_gas_price: to_hex_word(self.base_gas_price(caller, revision).await?),
        })
    }

    async fn base_gas_price(&self, caller: Address, revision: Revision) -> FeeResult<u128> {
        match self.base_gas_price {
            BaseGasPriceSource::Fixed(price) => Ok(price),
            BaseGasPriceSource::Params => {
                let request = CallRequest {
                    clauses: vec![base_gas_price_call()],
                    caller,
                    gas: DEFAULT_OFFERED_GAS,
                    gas_payer: None,
                };
                let outputs = self.node.inspect_clauses(&request, revision.as_str()).await?;
                let output = outputs.first().ok_or_else(|| {
                    FeeError::InvalidResponse("Empty base gas price response".to_string())
                })?;
                if output.reverted {
                    return Err(FeeError::SimulationError(format!(
                        "Base gas price lookup reverted: {}",
                        output.vm_error
                    )));
                }
                word_to_u128(&output.data).ok_or_else(|| {
                    FeeError::InvalidResponse("Malformed base gas price word".to_string())
                })
            }
        }
    }
}

fn revert_reason(output: &CallOutput) -> String {
    decode_revert_reason(&output.data).unwrap_or_else(|| output.vm_error.clone())
}

/// Estimate with default settings.
pub async fn estimate_gas(
    node: &dyn NodeApi,
    clauses: &[Clause],
    provided_gas: u64,
    caller: Address,
    gas_payer: Option<Address>,
) -> FeeResult<EstimateGasResult> {
    GasEstimator::new(node)
        .estimate(clauses, provided_gas, caller, gas_payer)
        .await
}
