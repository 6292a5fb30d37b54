use crate::blockchain::{hex_bytes, parse_quantity, Address, Amount, Clause};
use crate::errors::FeeResult;
use serde::{Deserialize, Serialize};

/// Header of a block as returned by `GET /blocks/{revision}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub id: String,
    pub number: u64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub gas_limit: u64,
    /// Present once the Galactica fee market is active
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
}

impl BlockHeader {
    pub fn is_galactica(&self) -> bool {
        self.base_fee_per_gas.is_some()
    }
}

/// Best block plus the software version the node reported alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct BestBlock {
    pub header: BlockHeader,
    pub node_version: Option<String>,
}

/// Body of `POST /accounts/*`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub clauses: Vec<Clause>,
    pub caller: Address,
    pub gas: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_payer: Option<Address>,
}

/// Result of simulating one clause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOutput {
    #[serde(with = "hex_bytes", default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub reverted: bool,
    #[serde(default)]
    pub vm_error: String,
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
    #[serde(default)]
    pub transfers: Vec<serde_json::Value>,
}

/// Response of `GET /fees/history`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeHistory {
    #[serde(default)]
    pub oldest_block: Option<String>,
    #[serde(default)]
    pub base_fee_per_gas: Vec<String>,
    #[serde(default)]
    pub gas_used_ratio: Vec<f64>,
    #[serde(default)]
    pub reward: Option<Vec<Vec<String>>>,
}

/// Response of `GET /fees/priority`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityFee {
    pub max_priority_fee_per_gas: String,
}

/// Response of `GET /accounts/{address}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    pub balance: String,
    pub energy: String,
    #[serde(default)]
    pub has_code: bool,
}

impl AccountState {
    pub fn vtho(&self) -> FeeResult<Amount> {
        parse_quantity(&self.energy).map(Amount::from_wei)
    }
}
