//! Two-tier TTL cache for parsed pool and market state.
//!
//! Hot entries (fresh parses on the buy path) live ~5s; cold entries (layout
//! data that rarely changes) live ~30s. Bounded; the entry closest to expiry
//! is evicted when full. Reads never suspend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Hot,
    Cold,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<V> {
    inner: Mutex<HashMap<String, Entry<V>>>,
    ttl_hot: Duration,
    ttl_cold: Duration,
    max_size: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl_hot: Duration, ttl_cold: Duration, max_size: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl_hot,
            ttl_cold,
            max_size: max_size.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut map = self.inner.lock();
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: V, tier: CacheTier) {
        let ttl = match tier {
            CacheTier::Hot => self.ttl_hot,
            CacheTier::Cold => self.ttl_cold,
        };
        let mut map = self.inner.lock();
        if map.len() >= self.max_size && !map.contains_key(key) {
            // Evict the entry closest to expiry.
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone())
            {
                map.remove(&oldest);
            }
        }
        map.insert(
            key.to_string(),
            Entry { value, expires_at: Instant::now() + ttl },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pool/market cache with the default tiers.
pub type PoolCache = TtlCache<super::pool::PoolState>;

pub fn default_pool_cache() -> PoolCache {
    TtlCache::new(Duration::from_secs(5), Duration::from_secs(30), 256)
}

pub type MarketCache = TtlCache<super::market::MarketState>;

pub fn default_market_cache() -> MarketCache {
    TtlCache::new(Duration::from_secs(5), Duration::from_secs(30), 256)
}
