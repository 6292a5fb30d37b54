//! Transaction fee service.
//!
//! Ties the node client, gas estimator, both fee models and the sufficiency
//! check together for one network. Fee history and balances are cached by
//! block id.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::Serialize;
use std::sync::Arc;

use crate::blockchain::{Address, Amount, Clause};
use crate::blockchain_client::{NodeApi, ThorClient};
use crate::cache::{BlockCache, CacheKey};
use crate::config_store::FeeConfig;
use crate::errors::FeeResult;
use crate::fees::estimator::BaseGasPriceSource;
use crate::fees::galactica::fetch_snapshot;
use crate::fees::{
    calculate_is_enough_gas, gas_by_coefficient, EstimateGasResult, FeeSnapshot, GalacticaFees,
    GasEstimator, GasFeeTable, GasPriceCoefficient, GasSufficiency,
};

/// What the caller wants to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeRequest {
    pub clauses: Vec<Clause>,
    pub caller: Address,
    pub gas_payer: Option<Address>,
    /// Zero lets the estimator size the gas limit
    pub provided_gas: u64,
    /// Sponsored by a delegation service whose address may not be known yet
    pub delegated: bool,
    pub coefficient: Option<GasPriceCoefficient>,
}

impl FeeRequest {
    pub fn new(clauses: Vec<Clause>, caller: Address) -> Self {
        Self {
            clauses,
            caller,
            gas_payer: None,
            provided_gas: 0,
            delegated: false,
            coefficient: None,
        }
    }

    pub fn is_delegated(&self) -> bool {
        self.delegated || self.gas_payer.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFees {
    pub estimate: EstimateGasResult,
    pub is_galactica: bool,
    pub coefficient: GasPriceCoefficient,
    pub legacy: GasFeeTable,
    pub galactica: GalacticaFees,
    /// Fee the sender must be able to cover at the chosen tier
    pub selected_fee: Amount,
    pub sufficiency: GasSufficiency,
    pub block_id: String,
}

#[derive(Clone)]
pub struct FeeService {
    node: Arc<dyn NodeApi>,
    network: String,
    min_next_revision: Version,
    base_gas_price: BaseGasPriceSource,
    default_coefficient: GasPriceCoefficient,
    fee_cache: Arc<BlockCache<Option<FeeSnapshot>>>,
    balance_cache: Arc<BlockCache<Amount>>,
}

impl FeeService {
    pub fn new(node: Arc<dyn NodeApi>, config: &FeeConfig) -> FeeResult<Self> {
        let capacity = config.fees.cache_capacity;
        Ok(Self {
            node,
            network: config.network.name.clone(),
            min_next_revision: config.estimation.min_next_revision()?,
            base_gas_price: config.estimation.base_gas_price,
            default_coefficient: config.fees.default_coefficient,
            fee_cache: Arc::new(BlockCache::with_capacity(capacity)),
            balance_cache: Arc::new(BlockCache::with_capacity(capacity)),
        })
    }

    /// Service talking to the configured node over HTTP.
    pub fn from_config(config: &FeeConfig) -> FeeResult<Self> {
        let client = ThorClient::with_timeout(
            config.network.endpoint.clone(),
            config.network.request_timeout(),
        )?;
        Self::new(Arc::new(client), config)
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn node(&self) -> &dyn NodeApi {
        self.node.as_ref()
    }

    pub fn estimator(&self) -> GasEstimator<'_> {
        GasEstimator::new(self.node.as_ref())
            .with_min_next_revision(self.min_next_revision.clone())
            .with_base_gas_price(self.base_gas_price)
    }

    /// Estimate gas, price it under the active fee model and check the
    /// caller can afford it.
    pub async fn transaction_fees(&self, request: &FeeRequest) -> FeeResult<TransactionFees> {
        let best = self.node.best_block().await?;
        let block_id = best.header.id.clone();
        let is_galactica = best.header.is_galactica();
        let coefficient = request.coefficient.unwrap_or(self.default_coefficient);

        let estimate = self
            .estimator()
            .estimate_at(
                &best,
                &request.clauses,
                request.provided_gas,
                request.caller,
                request.gas_payer,
            )
            .await?;

        let legacy = gas_by_coefficient(estimate.gas, estimate.base_gas_price_wei()?, coefficient)?;
        let galactica = if is_galactica {
            self.galactica_fees_at(&block_id, estimate.gas).await?
        } else {
            GalacticaFees::empty(false)
        };

        let selected_fee = match &galactica.options {
            Some(options) if is_galactica => options.get(coefficient).max_fee,
            _ => {
                if is_galactica {
                    log::warn!("no fee history for block {}, using legacy fee", block_id);
                }
                Amount::from_wei(legacy.selected.gas_raw)
            }
        };

        let balance = self.vtho_balance_at(request.caller, &block_id).await?;
        let sufficiency = calculate_is_enough_gas(
            &request.clauses,
            request.is_delegated(),
            balance,
            selected_fee,
        );

        log::debug!(
            "fees for {} at {}: gas {}, fee {}, enough {}",
            request.caller,
            block_id,
            estimate.gas,
            selected_fee,
            sufficiency.is_gas
        );

        Ok(TransactionFees {
            estimate,
            is_galactica,
            coefficient,
            legacy,
            galactica,
            selected_fee,
            sufficiency,
            block_id,
        })
    }

    /// Galactica fee options for `gas` at the current best block.
    pub async fn galactica_fees(&self, gas: u64) -> FeeResult<GalacticaFees> {
        let best = self.node.best_block().await?;
        if !best.header.is_galactica() {
            return Ok(GalacticaFees::empty(false));
        }
        self.galactica_fees_at(&best.header.id, gas).await
    }

    /// Fee options for `block_id` without waiting on the network.
    ///
    /// When that block has not been fetched yet, a refresh is started in the
    /// background and the newest earlier snapshot is returned with
    /// `is_loading` set.
    pub fn galactica_fees_now(&self, block_id: &str, gas: u64) -> FeeResult<GalacticaFees> {
        let key = CacheKey::new(self.network.clone(), None, block_id);
        if let Some(cached) = self.fee_cache.peek(&key) {
            return fees_from_cached(cached.value.as_ref(), gas, cached.updated_at, false);
        }

        self.spawn_fee_refresh(key);
        match self.fee_cache.latest(&self.network, None) {
            Some(stale) => fees_from_cached(stale.value.as_ref(), gas, stale.updated_at, true),
            None => Ok(GalacticaFees::empty(true)),
        }
    }

    /// VTHO balance of `address` at the current best block.
    pub async fn vtho_balance(&self, address: Address) -> FeeResult<Amount> {
        let best = self.node.best_block().await?;
        self.vtho_balance_at(address, &best.header.id).await
    }

    async fn galactica_fees_at(&self, block_id: &str, gas: u64) -> FeeResult<GalacticaFees> {
        let key = CacheKey::new(self.network.clone(), None, block_id);
        let node = self.node.clone();
        let cached = self
            .fee_cache
            .get_or_fetch(key, || async move { fetch_snapshot(node.as_ref()).await })
            .await?;
        fees_from_cached(cached.value.as_ref(), gas, cached.updated_at, false)
    }

    async fn vtho_balance_at(&self, address: Address, block_id: &str) -> FeeResult<Amount> {
        let key = CacheKey::new(self.network.clone(), Some(address), block_id);
        let node = self.node.clone();
        let cached = self
            .balance_cache
            .get_or_fetch(key, || async move { node.account(&address).await?.vtho() })
            .await?;
        Ok(cached.value)
    }

    fn spawn_fee_refresh(&self, key: CacheKey) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::debug!("no runtime, skipping fee refresh for {}", key.block_id);
            return;
        };

        let cache = self.fee_cache.clone();
        let node = self.node.clone();
        handle.spawn(async move {
            let block_id = key.block_id.clone();
            let result = cache
                .get_or_fetch(key, || async move { fetch_snapshot(node.as_ref()).await })
                .await;
            if let Err(e) = result {
                log::warn!("fee refresh for block {} failed: {}", block_id, e);
            }
        });
    }
}

fn fees_from_cached(
    snapshot: Option<&FeeSnapshot>,
    gas: u64,
    updated_at: DateTime<Utc>,
    is_loading: bool,
) -> FeeResult<GalacticaFees> {
    let Some(snapshot) = snapshot else {
        return Ok(GalacticaFees::empty(is_loading));
    };
    let mut fees = GalacticaFees::from_snapshot(snapshot, gas, updated_at)?;
    fees.is_loading = is_loading;
    Ok(fees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{AccountState, BestBlock, BlockHeader, CallOutput, CallRequest, FeeHistory};
    use crate::errors::FeeError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GWEI: u128 = 1_000_000_000;

    struct FakeNode {
        block_id: Mutex<String>,
        base_fee: Option<u128>,
        energy: u128,
        history_calls: AtomicUsize,
        best_calls: AtomicUsize,
        /// Block id moves to `0x0b` after the first best-block lookup
        advance_after_first: bool,
    }

    impl FakeNode {
        fn new(base_fee: Option<u128>, energy: u128) -> Self {
            Self {
                block_id: Mutex::new("0x0a".into()),
                base_fee,
                energy,
                history_calls: AtomicUsize::new(0),
                best_calls: AtomicUsize::new(0),
                advance_after_first: false,
            }
        }
    }

    #[async_trait]
    impl NodeApi for FakeNode {
        async fn best_block(&self) -> FeeResult<BestBlock> {
            let calls = self.best_calls.fetch_add(1, Ordering::SeqCst);
            let id = self.block_id.lock().clone();
            if calls == 0 && self.advance_after_first {
                *self.block_id.lock() = "0x0b".into();
            }
            Ok(BestBlock {
                header: BlockHeader {
                    id,
                    number: 10,
                    timestamp: 0,
                    gas_limit: 40_000_000,
                    base_fee_per_gas: self.base_fee.map(|f| format!("0x{:x}", f)),
                },
                node_version: Some("2.3.1".into()),
            })
        }

        async fn inspect_clauses(&self, request: &CallRequest, _: &str) -> FeeResult<Vec<CallOutput>> {
            Ok(request.clauses.iter().map(|_| CallOutput::default()).collect())
        }

        async fn fee_history(&self, count: u32, _: &str, _: &[u8]) -> FeeResult<FeeHistory> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            let base_fee = self
                .base_fee
                .ok_or_else(|| FeeError::NodeError { status: 400, message: "no fee market".into() })?;
            Ok(FeeHistory {
                oldest_block: Some("0x2".into()),
                base_fee_per_gas: vec![format!("0x{:x}", base_fee); count as usize + 1],
                gas_used_ratio: vec![0.5; count as usize],
                reward: Some(vec![vec!["0xa".into(), "0x14".into(), "0x1e".into()]; count as usize]),
            })
        }

        async fn max_priority_fee(&self) -> FeeResult<u128> {
            Ok(GWEI / 20)
        }

        async fn account(&self, _: &Address) -> FeeResult<AccountState> {
            Ok(AccountState {
                balance: "0x0".into(),
                energy: format!("0x{:x}", self.energy),
                has_code: false,
            })
        }
    }

    fn caller() -> Address {
        Address::from_hex("0xf077b491b355e64048ce21e3a6fc4751eeea77fa").unwrap()
    }

    fn service(node: Arc<FakeNode>) -> FeeService {
        FeeService::new(node, &FeeConfig::new("test")).unwrap()
    }

    fn transfer() -> Vec<Clause> {
        vec![Clause::transfer_vet(caller(), 1)]
    }

    #[tokio::test]
    async fn legacy_network_uses_coefficient_fee() {
        let node = Arc::new(FakeNode::new(None, Amount::UNITS_PER_VTHO));
        let fees = service(node.clone())
            .transaction_fees(&FeeRequest::new(transfer(), caller()))
            .await
            .unwrap();

        assert!(!fees.is_galactica);
        assert_eq!(fees.estimate.gas, 21_000);
        assert_eq!(fees.legacy.selected.gas_fee, "0.21");
        assert_eq!(fees.selected_fee.wei(), 210_000_000_000_000_000);
        assert!(fees.galactica.options.is_none());
        assert!(fees.sufficiency.is_gas);
        assert_eq!(node.history_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn galactica_network_uses_max_fee() {
        let node = Arc::new(FakeNode::new(Some(GWEI), 0));
        let mut request = FeeRequest::new(transfer(), caller());
        request.coefficient = Some(GasPriceCoefficient::High);

        let fees = service(node).transaction_fees(&request).await.unwrap();
        assert!(fees.is_galactica);
        assert_eq!(fees.coefficient, GasPriceCoefficient::High);
        assert_eq!(fees.selected_fee.wei(), 21_966_000_630_000);
        assert!(!fees.sufficiency.is_gas);
        assert_eq!(fees.sufficiency.gas_cost, fees.selected_fee);
    }

    #[tokio::test]
    async fn one_best_block_per_request() {
        let mut node = FakeNode::new(Some(GWEI), 0);
        node.advance_after_first = true;
        let node = Arc::new(node);
        let service = service(node.clone());

        let fees = service
            .transaction_fees(&FeeRequest::new(transfer(), caller()))
            .await
            .unwrap();
        assert_eq!(node.best_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fees.block_id, "0x0a");
        assert!(service
            .fee_cache
            .peek(&CacheKey::new("main", None, "0x0a"))
            .is_some());
    }

    #[tokio::test]
    async fn delegated_request_ignores_fee() {
        let node = Arc::new(FakeNode::new(Some(GWEI), 0));
        let mut request = FeeRequest::new(transfer(), caller());
        request.delegated = true;

        let fees = service(node).transaction_fees(&request).await.unwrap();
        assert!(fees.sufficiency.is_gas);
        assert!(fees.sufficiency.tx_cost_total.is_zero());
    }

    #[tokio::test]
    async fn fee_history_is_cached_per_block() {
        let node = Arc::new(FakeNode::new(Some(GWEI), 0));
        let service = service(node.clone());

        service.galactica_fees(21_000).await.unwrap();
        service.galactica_fees(50_000).await.unwrap();
        assert_eq!(node.history_calls.load(Ordering::SeqCst), 1);

        *node.block_id.lock() = "0x0b".into();
        service.galactica_fees(21_000).await.unwrap();
        assert_eq!(node.history_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_fees_are_served_while_loading() {
        let node = Arc::new(FakeNode::new(Some(GWEI), 0));
        let service = service(node.clone());

        let empty = service.galactica_fees_now("0x0a", 21_000).unwrap();
        assert!(empty.is_loading);
        assert!(empty.is_first_time_loading);
        assert!(empty.options.is_none());

        service.galactica_fees(21_000).await.unwrap();
        let fresh = service.galactica_fees_now("0x0a", 21_000).unwrap();
        assert!(!fresh.is_loading);

        let stale = service.galactica_fees_now("0x0b", 21_000).unwrap();
        assert!(stale.is_loading);
        assert!(!stale.is_first_time_loading);
        assert_eq!(stale.options, fresh.options);
    }
}
