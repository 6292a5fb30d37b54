// lib.rs - Gas estimation and fee calculation for VeChainThor wallets

pub mod api;
pub mod app_state;
pub mod blockchain;
pub mod blockchain_client;
pub mod cache;
pub mod config_store;
pub mod errors;
pub mod fees;
pub mod ledger;
pub mod requests;
pub mod service;
pub mod validation;

// Re-export common types
pub use api::types::{AccountState, BestBlock, BlockHeader, CallOutput, CallRequest, FeeHistory};
pub use app_state::{FeeContext, SharedFeeContext};
pub use blockchain::{Address, Amount, Clause};
pub use blockchain_client::{NodeApi, ThorClient};
pub use cache::{BlockCache, CacheKey, Cached};
pub use config_store::{ConfigStore, FeeConfig, NetworkConfig};
pub use errors::{FeeError, FeeResult};
pub use fees::{
    calculate_is_enough_gas, estimate_gas, gas_by_coefficient, gas_to_vtho, intrinsic_gas,
    EstimateGasResult, FeeOption, FeeSnapshot, GalacticaFees, GasEstimator, GasFee, GasFeeTable,
    GasPriceCoefficient, GasSufficiency, Revision, Tiers, TxFeeOption,
};
pub use ledger::{ConnectionState, LedgerConnection, LedgerDevice, LedgerErrorCode};
pub use requests::{DecodedRequest, ParsedRequest};
pub use service::{FeeRequest, FeeService, TransactionFees};
pub use validation::InputValidator;
