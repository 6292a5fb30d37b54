//! Block-keyed query cache.
//!
//! Values are keyed by the block they were computed for, so a new best block
//! is a cache miss rather than a TTL expiry. While the new block's value is
//! being fetched, [`BlockCache::latest`] keeps serving the previous one.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::blockchain::Address;
use crate::errors::FeeResult;

pub const DEFAULT_CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub network: String,
    /// `None` for network-wide data such as fee history
    pub address: Option<Address>,
    pub block_id: String,
}

impl CacheKey {
    pub fn new(network: impl Into<String>, address: Option<Address>, block_id: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address,
            block_id: block_id.into(),
        }
    }

    fn scope(&self) -> (String, Option<Address>) {
        (self.network.clone(), self.address)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cached<V> {
    pub value: V,
    pub block_id: String,
    pub updated_at: DateTime<Utc>,
}

struct Slot<V> {
    cell: Arc<OnceCell<Cached<V>>>,
    inserted: u64,
}

struct Inner<V> {
    slots: HashMap<CacheKey, Slot<V>>,
    latest: HashMap<(String, Option<Address>), (u64, Cached<V>)>,
    sequence: u64,
}

pub struct BlockCache<V> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
}

impl<V: Clone> BlockCache<V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                latest: HashMap::new(),
                sequence: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Return the value for `key`, running `fetch` at most once across
    /// concurrent callers. Failed fetches are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> FeeResult<Cached<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FeeResult<V>>,
    {
        let (cell, inserted) = self.slot(&key);

        let block_id = key.block_id.clone();
        let cached = cell
            .get_or_try_init(|| async move {
                let value = fetch().await?;
                Ok::<_, crate::errors::FeeError>(Cached {
                    value,
                    block_id,
                    updated_at: Utc::now(),
                })
            })
            .await?
            .clone();

        self.record_latest(&key, inserted, &cached);
        Ok(cached)
    }

    /// Completed value for exactly this key.
    pub fn peek(&self, key: &CacheKey) -> Option<Cached<V>> {
        let inner = self.inner.lock();
        inner.slots.get(key).and_then(|slot| slot.cell.get().cloned())
    }

    /// Newest completed value for a network and address, whatever the block.
    pub fn latest(&self, network: &str, address: Option<Address>) -> Option<Cached<V>> {
        let inner = self.inner.lock();
        inner
            .latest
            .get(&(network.to_string(), address))
            .map(|(_, cached)| cached.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.latest.clear();
    }

    fn slot(&self, key: &CacheKey) -> (Arc<OnceCell<Cached<V>>>, u64) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get(key) {
            return (slot.cell.clone(), slot.inserted);
        }

        inner.sequence += 1;
        let inserted = inner.sequence;
        let cell = Arc::new(OnceCell::new());
        inner.slots.insert(
            key.clone(),
            Slot {
                cell: cell.clone(),
                inserted,
            },
        );

        while inner.slots.len() > self.capacity {
            let oldest = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.inserted)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(oldest) => {
                    inner.slots.remove(&oldest);
                    let scope = oldest.scope();
                    if !inner.slots.keys().any(|key| key.scope() == scope) {
                        inner.latest.remove(&scope);
                    }
                }
                None => break,
            }
        }

        (cell, inserted)
    }

    fn record_latest(&self, key: &CacheKey, inserted: u64, cached: &Cached<V>) {
        let mut inner = self.inner.lock();
        // Evicted while the fetch was in flight.
        if !inner.slots.contains_key(key) {
            return;
        }
        let scope = key.scope();
        let newer = inner
            .latest
            .get(&scope)
            .map_or(true, |(current, _)| inserted >= *current);
        if newer {
            inner.latest.insert(scope, (inserted, cached.clone()));
        }
    }
}

impl<V: Clone> Default for BlockCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
