use crate::Coin;
use bitcoin::OutPoint;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only access to the persistent UTXO set.
///
/// Lookups are issued concurrently from the input fetch workers. A panicking lookup
/// resolves the rest of the worker batch as missing when panics unwind.
pub trait CoinStore: Send + Sync {
    /// Returns the coin at `outpoint`, `None` if it does not exist or was spent.
    fn lookup(&self, outpoint: &OutPoint) -> Option<Coin>;
}

impl CoinStore for HashMap<OutPoint, Coin> {
    fn lookup(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.get(outpoint).cloned()
    }
}

impl<T: CoinStore + ?Sized> CoinStore for Arc<T> {
    fn lookup(&self, outpoint: &OutPoint) -> Option<Coin> {
        (**self).lookup(outpoint)
    }
}

/// In-memory [`CoinStore`] which can be updated while being shared.
#[derive(Debug, Default)]
pub struct MemoryCoinStore {
    coins: RwLock<HashMap<OutPoint, Coin>>,
}

impl MemoryCoinStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, outpoint: OutPoint, coin: Coin) -> Option<Coin> {
        self.coins.write().insert(outpoint, coin)
    }

    pub fn remove(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.write().remove(outpoint)
    }

    pub fn len(&self) -> usize {
        self.coins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.read().is_empty()
    }
}

impl FromIterator<(OutPoint, Coin)> for MemoryCoinStore {
    fn from_iter<I: IntoIterator<Item = (OutPoint, Coin)>>(iter: I) -> Self {
        Self {
            coins: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl CoinStore for MemoryCoinStore {
    fn lookup(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.read().get(outpoint).cloned()
    }
}
