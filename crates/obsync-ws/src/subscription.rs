//! Markets registered on a shared connection, and request ids.

use obsync_core::MarketId;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Markets that must be (re)subscribed on every connect.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    markets: RwLock<BTreeSet<MarketId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the market was already registered.
    pub fn add(&self, market: MarketId) -> bool {
        self.markets.write().insert(market)
    }

    /// Returns false if the market was not registered.
    pub fn remove(&self, market: &MarketId) -> bool {
        self.markets.write().remove(market)
    }

    pub fn contains(&self, market: &MarketId) -> bool {
        self.markets.read().contains(market)
    }

    /// Registered markets in stable order.
    pub fn markets(&self) -> Vec<MarketId> {
        self.markets.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.markets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.read().is_empty()
    }
}

/// Monotonic request id source, owned by one connection.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
